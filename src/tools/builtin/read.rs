// file_read - reads file contents
//
// Supports optional offset (1-indexed start line) and limit (max lines)
// so the model can read large files in focused chunks.

use super::{truncate_to_boundary, Tool};
use crate::tools::types::{ToolInputSchema, ToolOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

const MAX_READ_BYTES: usize = 100 * 1024;

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use offset and limit to read a specific range of lines \
         (e.g., offset=100 limit=50 reads lines 100-149). Without them, reads the whole file \
         up to 100 KB."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema {
            schema_type: "object".to_string(),
            properties: serde_json::json!({
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start reading from (1-indexed, optional)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of lines to read (optional)"
                }
            }),
            required: vec!["path".to_string()],
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let path = input["path"].as_str().context("Missing path parameter")?;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path))?;
        let contents = String::from_utf8_lossy(&bytes);

        let offset = input["offset"].as_u64().map(|n| n as usize);
        let limit = input["limit"].as_u64().map(|n| n as usize);

        if offset.is_none() && limit.is_none() {
            if contents.len() > MAX_READ_BYTES {
                return Ok(ToolOutput::success(format!(
                    "{}\n\n[File truncated - showing first {} of {} bytes; use offset/limit to read more]",
                    truncate_to_boundary(&contents, MAX_READ_BYTES),
                    MAX_READ_BYTES,
                    contents.len()
                )));
            }
            return Ok(ToolOutput::success(contents.into_owned()));
        }

        let all_lines: Vec<&str> = contents.lines().collect();
        let total_lines = all_lines.len();
        let start = offset.map(|o| o.saturating_sub(1)).unwrap_or(0);
        let end = match limit {
            Some(l) => (start + l).min(total_lines),
            None => total_lines,
        };

        if start >= total_lines {
            return Ok(ToolOutput::success(format!(
                "File has {} lines. Offset {} is past the end.",
                total_lines,
                start + 1
            )));
        }

        let width = end.to_string().len();
        let numbered: Vec<String> = all_lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>width$}\t{}", start + i + 1, line, width = width))
            .collect();
        let body = numbered.join("\n");

        Ok(ToolOutput::success(
            truncate_to_boundary(&body, MAX_READ_BYTES).to_string(),
        ))
    }
}
