// file_list - lists directory entries, optionally recursive and filtered

use super::Tool;
use crate::tools::types::{ToolInputSchema, ToolOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MAX_ENTRIES: usize = 1000;
const DEFAULT_RECURSIVE_DEPTH: usize = 8;

pub struct FileListTool;

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are shown with a trailing '/'. \
         Set recursive to descend into subdirectories and pattern to filter names by glob."
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema {
            schema_type: "object".to_string(),
            properties: serde_json::json!({
                "path": {
                    "type": "string",
                    "description": "Directory to list"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Descend into subdirectories (default false)"
                },
                "max_depth": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum depth when recursive (default 8)"
                },
                "pattern": {
                    "type": "string",
                    "description": "Glob matched against entry names, e.g. '*.rs'"
                }
            }),
            required: vec!["path".to_string()],
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let root = PathBuf::from(input["path"].as_str().context("Missing path parameter")?);
        let recursive = input["recursive"].as_bool().unwrap_or(false);
        let max_depth = if recursive {
            input["max_depth"]
                .as_u64()
                .map(|d| d as usize)
                .unwrap_or(DEFAULT_RECURSIVE_DEPTH)
        } else {
            1
        };
        let pattern = match input["pattern"].as_str() {
            Some(p) => Some(
                glob::Pattern::new(p).with_context(|| format!("Invalid glob pattern: {}", p))?,
            ),
            None => None,
        };

        if !root.is_dir() {
            return Ok(ToolOutput::error(format!(
                "Not a directory: {}",
                root.display()
            )));
        }

        let listing = tokio::task::spawn_blocking(move || {
            list_entries(&root, max_depth, pattern.as_ref())
        })
        .await
        .context("Directory listing task failed")??;

        Ok(ToolOutput::success(listing))
    }
}

fn list_entries(root: &Path, max_depth: usize, pattern: Option<&glob::Pattern>) -> Result<String> {
    let mut entries = Vec::new();
    let mut truncated = false;

    for entry in WalkDir::new(root).min_depth(1).max_depth(max_depth) {
        let entry =
            entry.with_context(|| format!("Failed to read directory {}", root.display()))?;

        if let Some(pattern) = pattern {
            if !pattern.matches(&entry.file_name().to_string_lossy()) {
                continue;
            }
        }

        if entries.len() == MAX_ENTRIES {
            truncated = true;
            break;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let mut line = relative.to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            line.push('/');
        }
        entries.push(line);
    }

    entries.sort();

    if entries.is_empty() {
        return Ok(format!("{} is empty", root.display()));
    }

    let mut listing = entries.join("\n");
    if truncated {
        listing.push_str(&format!("\n\n[Listing truncated at {} entries]", MAX_ENTRIES));
    }
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src").join("lib.rs"), "").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_flat_listing() {
        let dir = fixture();
        let output = FileListTool
            .execute(json!({"path": dir.path().to_str().unwrap()}))
            .await
            .unwrap();
        assert_eq!(output.content, "a.rs\nb.txt\nsrc/");
    }

    #[tokio::test]
    async fn test_recursive_with_pattern() {
        let dir = fixture();
        let output = FileListTool
            .execute(json!({
                "path": dir.path().to_str().unwrap(),
                "recursive": true,
                "pattern": "*.rs"
            }))
            .await
            .unwrap();
        let expected = format!("a.rs\n{}", PathBuf::from("src").join("lib.rs").display());
        assert_eq!(output.content, expected);
    }

    #[tokio::test]
    async fn test_not_a_directory() {
        let dir = fixture();
        let file = dir.path().join("a.rs");
        let output = FileListTool
            .execute(json!({"path": file.to_str().unwrap()}))
            .await
            .unwrap();
        assert!(output.is_error);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let output = FileListTool
            .execute(json!({"path": dir.path().to_str().unwrap()}))
            .await
            .unwrap();
        assert!(output.content.ends_with("is empty"));
    }
}
