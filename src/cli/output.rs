// Turn progress printing
//
// Assistant text goes to stdout as it streams; tool activity goes to stderr.

use crate::orchestrator::TurnFragment;
use std::io::Write;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

const PREVIEW_CHARS: usize = 200;

/// One-line notice for tool activity; None for text and round markers
pub fn describe(fragment: &TurnFragment) -> Option<String> {
    match fragment {
        TurnFragment::ToolRequested {
            tool_name, input, ..
        } => Some(format!("-> {} {}", tool_name, preview(&input.to_string()))),
        TurnFragment::ToolDeclined { tool_name, .. } => {
            Some(format!("x  {} declined", tool_name))
        }
        TurnFragment::ToolCompleted {
            tool_name,
            is_error,
            content,
            ..
        } => {
            let status = if *is_error { "failed" } else { "done" };
            Some(format!("<- {} {}: {}", tool_name, status, preview(content)))
        }
        TurnFragment::Text(_) | TurnFragment::RoundFinished { .. } => None,
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((index, _)) => format!("{}...", &flat[..index]),
        None => flat,
    }
}

/// Print fragments until the sender is dropped
pub fn spawn_printer(mut rx: UnboundedReceiver<TurnFragment>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut mid_line = false;
        while let Some(fragment) = rx.recv().await {
            if let TurnFragment::Text(text) = &fragment {
                let mut stdout = std::io::stdout();
                let _ = write!(stdout, "{}", text);
                let _ = stdout.flush();
                mid_line = !text.ends_with('\n');
                continue;
            }
            if let Some(notice) = describe(&fragment) {
                if mid_line {
                    println!();
                    mid_line = false;
                }
                eprintln!("{}", notice);
            }
        }
        if mid_line {
            println!();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_tool_fragments() {
        let requested = TurnFragment::ToolRequested {
            call_id: "c1".into(),
            tool_name: "file_list".into(),
            input: json!({"path": "/tmp"}),
        };
        assert_eq!(
            describe(&requested).unwrap(),
            r#"-> file_list {"path":"/tmp"}"#
        );

        let failed = TurnFragment::ToolCompleted {
            call_id: "c1".into(),
            tool_name: "bash".into(),
            is_error: true,
            content: "exit 1\nno such file".into(),
        };
        assert_eq!(describe(&failed).unwrap(), "<- bash failed: exit 1 no such file");

        assert!(describe(&TurnFragment::Text("hi".into())).is_none());
    }

    #[test]
    fn test_preview_truncates_long_output() {
        let long = "é".repeat(PREVIEW_CHARS + 10);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), PREVIEW_CHARS + 3);
    }
}
