// file_write - creates or overwrites a file

use super::Tool;
use crate::tools::types::{ToolInputSchema, ToolOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file, replacing it if it exists. Parent directories are created."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema::simple(vec![
            ("path", "Path of the file to write"),
            ("content", "Full content to write to the file"),
        ])
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let path = input["path"].as_str().context("Missing path parameter")?;
        let content = input["content"]
            .as_str()
            .context("Missing content parameter")?;

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create directory {}", parent.display())
                })?;
            }
        }

        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write file: {}", path))?;

        Ok(ToolOutput::success(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("out.txt");

        let output = FileWriteTool
            .execute(json!({"path": path.to_str().unwrap(), "content": "hello"}))
            .await
            .unwrap();

        assert!(!output.is_error);
        assert!(output.content.starts_with("Wrote 5 bytes"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "old content").unwrap();

        FileWriteTool
            .execute(json!({"path": path.to_str().unwrap(), "content": "new"}))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }
}
