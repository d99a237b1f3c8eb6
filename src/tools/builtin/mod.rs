// Built-in in-process tool host
//
// Tools are trait objects resolved once when registered; each input schema
// is compiled at the same time and every call is validated against it
// before the tool runs. Tool failures come back as error outputs, never as
// host errors.

use crate::errors::HostError;
use crate::tools::hosts::{ToolHost, TransportKind};
use crate::tools::schema;
use crate::tools::types::{ToolDescriptor, ToolInputSchema, ToolOutput};
use anyhow::Result;
use async_trait::async_trait;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

mod bash;
mod http;
mod list;
mod read;
mod write;

pub use bash::BashTool;
pub use http::HttpRequestTool;
pub use list::FileListTool;
pub use read::FileReadTool;
pub use write::FileWriteTool;

/// A tool that runs inside this process
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn input_schema(&self) -> ToolInputSchema;

    /// Run with input that already passed schema validation
    async fn execute(&self, input: Value) -> Result<ToolOutput>;
}

struct Entry {
    tool: Arc<dyn Tool>,
    descriptor: ToolDescriptor,
    validator: Validator,
}

pub struct BuiltinHost {
    id: String,
    entries: HashMap<String, Entry>,
    /// Registration order, for stable listings
    order: Vec<String>,
}

impl BuiltinHost {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Host with file read/write/list, shell and HTTP tools
    pub fn with_default_tools(id: impl Into<String>) -> Result<Self> {
        let mut host = Self::new(id);
        host.register(Arc::new(FileReadTool))?;
        host.register(Arc::new(FileWriteTool))?;
        host.register(Arc::new(FileListTool))?;
        host.register(Arc::new(BashTool::default()))?;
        host.register(Arc::new(HttpRequestTool::new()?))?;
        Ok(host)
    }

    /// Add a tool. Its schema is compiled here; a later tool with the same
    /// name replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.input_schema().to_value();
        let validator = schema::compile(&schema)?;
        let name = tool.name().to_string();
        let descriptor = ToolDescriptor::new(&name, tool.description(), schema, &self.id);

        if !self.entries.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.entries.insert(
            name,
            Entry {
                tool,
                descriptor,
                validator,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl ToolHost for BuiltinHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport_kind(&self) -> TransportKind {
        TransportKind::InProcess
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    #[instrument(skip(self, input), fields(host = %self.id, tool = %name))]
    async fn call_tool(&self, name: &str, input: Value) -> Result<ToolOutput, HostError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| HostError::ToolNotFound(name.to_string()))?;

        let violations = schema::violations(&entry.validator, &input);
        if !violations.is_empty() {
            return Ok(ToolOutput::error(format!(
                "Invalid input for '{}':\n- {}",
                name,
                violations.join("\n- ")
            )));
        }

        match entry.tool.execute(input).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!("Tool execution failed: {:#}", e);
                Ok(ToolOutput::error(format!("Execution error: {:#}", e)))
            }
        }
    }

    async fn shutdown(&self) -> Result<(), HostError> {
        Ok(())
    }
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a char
pub(crate) fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
