// Persistent approval cache for tool invocations
//
// Approvals are keyed by a content hash of the tool name and its input, so a
// remembered approval only covers the exact same call. Two kinds of tools get
// narrower keys: file writes are keyed by destination path and shell tools by
// the command text alone.
//
// Records expire after a TTL. Expiry is checked lazily when a key is looked
// up; expired records are deleted at that point.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default lifetime of a remembered approval
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Tools keyed by destination path
const WRITE_TOOLS: &[&str] = &["file_write", "write_file", "write"];

/// Tools keyed by command text
const SHELL_TOOLS: &[&str] = &["bash", "shell", "run_command"];

const SUMMARY_MAX_CHARS: usize = 80;

/// One remembered approval as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRecord {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub summary: String,
}

impl PermissionRecord {
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFlags {
    #[serde(rename = "alwaysAsk", default)]
    pub always_ask: bool,
}

/// On-disk document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionFile {
    #[serde(rename = "approvedTools", default)]
    pub approved_tools: BTreeMap<String, PermissionRecord>,
    #[serde(default)]
    pub session: SessionFlags,
}

impl PermissionFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read permissions from {}", path.display()))?;

        serde_json::from_str(&contents).context("Failed to parse permissions JSON")
    }

    /// Save to JSON file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let temp_path = path.with_extension("tmp");
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize permissions")?;

        fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write to {}", temp_path.display()))?;

        fs::rename(&temp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

pub struct PermissionStore {
    path: Option<PathBuf>,
    data: PermissionFile,
    ttl: Duration,
}

impl PermissionStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: PermissionFile::default(),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    /// Open the store at `path`, reading it fully. A missing file is an empty
    /// store; an unreadable one is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = if path.exists() {
            match PermissionFile::load(&path) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Ignoring unreadable permission file {}: {:#}", path.display(), e);
                    PermissionFile::default()
                }
            }
        } else {
            PermissionFile::default()
        };

        debug!(
            path = %path.display(),
            records = data.approved_tools.len(),
            "Loaded permission store"
        );

        Self {
            path: Some(path),
            data,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_approved(&mut self, tool_name: &str, input: &Value) -> bool {
        self.is_approved_at(tool_name, input, Utc::now())
    }

    /// Approval check against an explicit clock reading
    pub fn is_approved_at(&mut self, tool_name: &str, input: &Value, now: DateTime<Utc>) -> bool {
        if self.data.session.always_ask {
            return false;
        }

        let key = permission_key(tool_name, input);
        let Some(record) = self.data.approved_tools.get(&key) else {
            return false;
        };

        if now - record.created_at() > self.ttl {
            debug!(tool = %tool_name, "Remembered approval expired");
            self.data.approved_tools.remove(&key);
            if let Err(e) = self.persist() {
                warn!("Failed to persist expired approval removal: {:#}", e);
            }
            return false;
        }

        true
    }

    pub fn approve(&mut self, tool_name: &str, input: &Value, remember: bool) -> Result<()> {
        self.approve_at(tool_name, input, remember, Utc::now())
    }

    /// Record an approval. Without `remember` the decision covers only the
    /// current call and nothing is stored.
    pub fn approve_at(
        &mut self,
        tool_name: &str,
        input: &Value,
        remember: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !remember {
            return Ok(());
        }

        let key = permission_key(tool_name, input);
        self.data.approved_tools.insert(
            key,
            PermissionRecord {
                tool_name: tool_name.to_string(),
                timestamp: now.timestamp_millis(),
                summary: summarize(tool_name, input),
            },
        );
        self.persist()
    }

    /// Forget every remembered approval
    pub fn clear(&mut self) -> Result<()> {
        self.data.approved_tools.clear();
        self.persist()
    }

    pub fn set_always_ask(&mut self, always_ask: bool) -> Result<()> {
        self.data.session.always_ask = always_ask;
        self.persist()
    }

    pub fn always_ask(&self) -> bool {
        self.data.session.always_ask
    }

    /// Stored records by key, expired ones included
    pub fn records(&self) -> &BTreeMap<String, PermissionRecord> {
        &self.data.approved_tools
    }

    pub fn len(&self) -> usize {
        self.data.approved_tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.approved_tools.is_empty()
    }

    fn persist(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.data.save(path),
            None => Ok(()),
        }
    }
}

/// Content-addressed approval key for a call
pub fn permission_key(tool_name: &str, input: &Value) -> String {
    if WRITE_TOOLS.contains(&tool_name) {
        if let Some(path) = target_path(input) {
            return sha256_hex(&format!("{}\0path\0{}", tool_name, path));
        }
    }

    if SHELL_TOOLS.contains(&tool_name) {
        if let Some(command) = input["command"].as_str() {
            return sha256_hex(&format!("{}\0command\0{}", tool_name, command));
        }
    }

    sha256_hex(&format!("{}\0{}", tool_name, canonical_json(input)))
}

/// JSON text with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn target_path(input: &Value) -> Option<&str> {
    input["path"].as_str().or_else(|| input["file_path"].as_str())
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn summarize(tool_name: &str, input: &Value) -> String {
    let detail = if WRITE_TOOLS.contains(&tool_name) {
        target_path(input).map(str::to_string)
    } else if SHELL_TOOLS.contains(&tool_name) {
        input["command"].as_str().map(str::to_string)
    } else {
        None
    }
    .unwrap_or_else(|| canonical_json(input));

    let detail: String = if detail.chars().count() > SUMMARY_MAX_CHARS {
        let mut cut: String = detail.chars().take(SUMMARY_MAX_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        detail
    };
    format!("{}: {}", tool_name, detail)
}
