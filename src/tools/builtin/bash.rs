// bash - executes shell commands

use super::{truncate_to_boundary, Tool};
use crate::tools::types::{ToolInputSchema, ToolOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const MAX_OUTPUT_CHARS: usize = 20_000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct BashTool {
    timeout: Duration,
}

impl BashTool {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute bash commands. Use for terminal operations like git, cargo, ls, etc."
    }

    fn input_schema(&self) -> ToolInputSchema {
        let mut schema = ToolInputSchema::simple(vec![
            ("command", "The bash command to execute"),
            ("description", "Brief description of what this command does"),
        ]);
        schema.required.retain(|r| r == "command");
        schema
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let command = input["command"]
            .as_str()
            .context("Missing command parameter")?;

        let child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn command: {}", command))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for command")?,
            Err(_) => {
                return Ok(ToolOutput::error(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                )))
            }
        };

        let mut result = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str("STDERR:\n");
            result.push_str(&stderr);
        }

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&format!("Exit code: {}", exit_code));
        }

        if result.len() > MAX_OUTPUT_CHARS {
            result = format!(
                "{}\n\n[Output truncated - showing first 20,000 characters]",
                truncate_to_boundary(&result, MAX_OUTPUT_CHARS)
            );
        }

        Ok(ToolOutput {
            content: result,
            is_error: exit_code != 0,
        })
    }
}
