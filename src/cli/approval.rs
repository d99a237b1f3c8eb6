// Terminal approval prompt

use super::input::LineInput;
use crate::tools::approval::{ApprovalDecision, ApprovalGate, ApprovalRequest};
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

/// Asks on stderr and reads the answer from the shared input
pub struct TerminalApproval {
    input: Arc<LineInput>,
}

impl TerminalApproval {
    pub fn new(input: Arc<LineInput>) -> Self {
        Self { input }
    }
}

/// `y`/`yes` approves once, `a`/`always` remembers, anything else denies
pub fn parse_answer(answer: &str) -> ApprovalDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::once(),
        "a" | "always" => ApprovalDecision::always(),
        _ => ApprovalDecision::deny(),
    }
}

#[async_trait]
impl ApprovalGate for TerminalApproval {
    async fn ask_approval(&self, request: &ApprovalRequest) -> ApprovalDecision {
        // let streamed text reach the terminal before the prompt
        tokio::task::yield_now().await;

        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "\n{}", request.message);
        let _ = stderr.flush();

        match self.input.read_line("Approve? [y]es / [a]lways / [n]o: ").await {
            Ok(Some(answer)) => parse_answer(&answer),
            Ok(None) => ApprovalDecision::deny(),
            Err(e) => {
                warn!("Failed to read approval answer: {:#}", e);
                ApprovalDecision::deny()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y"), ApprovalDecision::once());
        assert_eq!(parse_answer(" YES "), ApprovalDecision::once());
        assert_eq!(parse_answer("a"), ApprovalDecision::always());
        assert_eq!(parse_answer("always"), ApprovalDecision::always());
        assert_eq!(parse_answer("n"), ApprovalDecision::deny());
        assert_eq!(parse_answer(""), ApprovalDecision::deny());
        assert_eq!(parse_answer("sure"), ApprovalDecision::deny());
    }

    #[tokio::test]
    async fn test_answers_come_from_input() {
        let input = Arc::new(LineInput::from_reader(&b"a\n"[..]));
        let gate = TerminalApproval::new(input);
        let request = ApprovalRequest::new("bash", &json!({"command": "ls"}));

        assert_eq!(gate.ask_approval(&request).await, ApprovalDecision::always());
        // end of input denies
        assert_eq!(gate.ask_approval(&request).await, ApprovalDecision::deny());
    }
}
