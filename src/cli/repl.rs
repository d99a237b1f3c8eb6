// Prompt loop

use super::commands::{handle_command, Command};
use super::input::LineInput;
use super::output;
use crate::conversation::Conversation;
use crate::errors::OrchestratorError;
use crate::orchestrator::{ToolCallOrchestrator, TurnOutcome};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct Repl {
    orchestrator: ToolCallOrchestrator,
    input: Arc<LineInput>,
    conversation: Conversation,
    is_interactive: bool,
}

impl Repl {
    pub fn new(orchestrator: ToolCallOrchestrator, input: Arc<LineInput>) -> Self {
        Self {
            orchestrator,
            is_interactive: input.is_terminal(),
            input,
            conversation: Conversation::new(),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Run one user prompt to completion. Ctrl-C cancels it.
    ///
    /// A turn that fails is dropped from the history so the next prompt
    /// starts from a closed conversation.
    pub async fn run_once(&mut self, prompt: &str) -> Result<TurnOutcome, OrchestratorError> {
        let checkpoint = self.conversation.clone();
        self.conversation.push_user(prompt);

        let tools = self.orchestrator.hosts().tool_descriptors().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let printer = output::spawn_printer(rx);

        let cancel = CancellationToken::new();
        let interrupt = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let result = self
            .orchestrator
            .run_turn(&mut self.conversation, &tools, &tx, &cancel)
            .await;

        interrupt.abort();
        drop(tx);
        let _ = printer.await;

        match &result {
            Ok(outcome) => debug!(
                rounds = outcome.rounds,
                tool_calls = outcome.tool_calls,
                "Turn complete"
            ),
            Err(_) => self.conversation = checkpoint,
        }
        result
    }

    pub async fn run(&mut self) -> Result<()> {
        if self.is_interactive {
            println!("marten - type /help for commands");
        }

        loop {
            let prompt = if self.is_interactive { "> " } else { "" };
            let line = tokio::select! {
                line = self.input.read_line(prompt) => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            self.input.remember(input);

            if let Some(command) = Command::parse(input) {
                match command {
                    Command::Quit => break,
                    Command::Clear => self.conversation = Conversation::new(),
                    _ => {}
                }
                let outcome = handle_command(
                    command,
                    self.orchestrator.hosts(),
                    self.orchestrator.permissions(),
                )
                .await;
                match outcome {
                    Ok(text) => println!("{}", text),
                    Err(e) => eprintln!("Error: {:#}", e),
                }
                continue;
            }

            match self.run_once(input).await {
                Ok(_) => {}
                Err(OrchestratorError::Cancelled) => eprintln!("Cancelled."),
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        if self.is_interactive {
            println!("Goodbye!");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticHostSource;
    use crate::providers::{ScriptedProvider, ScriptedResponse};
    use crate::stream::StreamDialect;
    use crate::tools::approval::DenyAll;
    use crate::tools::hosts::ToolHostManager;
    use crate::tools::permissions::PermissionStore;
    use tokio::sync::Mutex;

    fn repl(responses: Vec<ScriptedResponse>, input: &'static [u8]) -> Repl {
        let orchestrator = ToolCallOrchestrator::new(
            Arc::new(ScriptedProvider::new(StreamDialect::Anthropic, responses)),
            Arc::new(ToolHostManager::new(Arc::new(StaticHostSource::default()))),
            Arc::new(Mutex::new(PermissionStore::in_memory())),
            Arc::new(DenyAll),
        );
        Repl::new(orchestrator, Arc::new(LineInput::from_reader(input)))
    }

    #[tokio::test]
    async fn test_failed_turn_is_dropped() {
        let mut repl = repl(
            vec![
                ScriptedResponse::Status(500, "boom".into()),
                ScriptedResponse::anthropic_text("fine"),
            ],
            b"",
        );
        assert!(repl.run_once("first").await.is_err());
        assert!(repl.conversation().is_empty());

        repl.run_once("second").await.unwrap();
        assert_eq!(repl.conversation().len(), 2);
        assert_eq!(repl.conversation().messages()[0].text(), "second");
    }

    #[tokio::test]
    async fn test_loop_runs_prompts_until_quit() {
        let mut repl = repl(
            vec![
                ScriptedResponse::anthropic_text("one"),
                ScriptedResponse::anthropic_text("two"),
            ],
            b"hello\n\n/clear\nagain\n/quit\nignored\n",
        );
        repl.run().await.unwrap();
        // /clear dropped the first exchange
        assert_eq!(repl.conversation().len(), 2);
        assert_eq!(repl.conversation().messages()[1].text(), "two");
    }
}
