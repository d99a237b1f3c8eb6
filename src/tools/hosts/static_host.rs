// In-memory tool host for exercising the manager and orchestrator

use super::{ToolHost, TransportKind};
use crate::errors::HostError;
use crate::tools::types::{ToolDescriptor, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

type Handler = dyn Fn(&str, &Value) -> ToolOutput + Send + Sync;

/// In-memory host with a fixed tool list.
///
/// Without a handler every call echoes its input back as a success.
pub struct StaticHost {
    id: String,
    kind: TransportKind,
    tools: Vec<ToolDescriptor>,
    handler: Option<Arc<Handler>>,
    calls: Mutex<Vec<(String, Value)>>,
    closed: CancellationToken,
    shutdowns: Mutex<usize>,
}

impl StaticHost {
    pub fn new(id: impl Into<String>, tool_names: &[&str]) -> Self {
        let id = id.into();
        let tools = tool_names
            .iter()
            .map(|name| {
                ToolDescriptor::new(
                    *name,
                    format!("{} from {}", name, id),
                    serde_json::json!({"type": "object"}),
                    &id,
                )
            })
            .collect();
        Self {
            id,
            kind: TransportKind::InProcess,
            tools,
            handler: None,
            calls: Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
            shutdowns: Mutex::new(0),
        }
    }

    pub fn with_handler(
        mut self,
        handler: impl Fn(&str, &Value) -> ToolOutput + Send + Sync + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Report as a different transport (lets tests stand in for remote hosts)
    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.lock().map(|n| *n).unwrap_or_default()
    }

    /// Simulate the host going away on its own
    pub fn close(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl ToolHost for StaticHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    async fn call_tool(&self, name: &str, input: Value) -> Result<ToolOutput, HostError> {
        if self.closed.is_cancelled() {
            return Err(HostError::Exited {
                host: self.id.clone(),
                reason: "host closed".to_string(),
            });
        }
        if !self.tools.iter().any(|t| t.name == name) {
            return Err(HostError::ToolNotFound(name.to_string()));
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((name.to_string(), input.clone()));
        }
        Ok(match &self.handler {
            Some(handler) => handler(name, &input),
            None => ToolOutput::success(input.to_string()),
        })
    }

    async fn shutdown(&self) -> Result<(), HostError> {
        if let Ok(mut n) = self.shutdowns.lock() {
            *n += 1;
        }
        Ok(())
    }

    fn closed(&self) -> Option<CancellationToken> {
        Some(self.closed.clone())
    }
}
