// MCP client session shared by remote hosts
//
// rmcp runs the JSON-RPC session (handshake, request ids, pagination, server
// pings). Each transport hands it a reader/writer or sink/stream pair plus a
// `HostLink` for whatever the session does not own: a process group, an
// event stream, a server-side session id.

use super::{ToolHost, TransportKind};
use crate::errors::HostError;
use crate::tools::types::{ToolDescriptor, ToolOutput};
use async_trait::async_trait;
use rmcp::model::ClientInfo;
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::IntoTransport;
use rmcp::ServiceExt;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// How long a failed request waits for the link to report the host gone
const EXIT_SETTLE: Duration = Duration::from_millis(250);

type ClientSession = RunningService<RoleClient, ClientInfo>;

/// Transport resources that live beside the session
#[async_trait]
pub(crate) trait HostLink: Send + Sync {
    /// Release them once the session has stopped
    async fn close(&self) -> Result<(), HostError>;

    /// Cancelled when the far end goes away on its own
    fn closed(&self) -> Option<CancellationToken> {
        None
    }

    /// The most recent transport failure, if the link recorded one
    fn take_error(&self) -> Option<HostError> {
        None
    }
}

/// Convert between plain JSON and rmcp's model types
pub(crate) fn to_rmcp<T, U>(value: T) -> Result<U, serde_json::Error>
where
    T: serde::Serialize,
    U: serde::de::DeserializeOwned,
{
    serde_json::from_value(serde_json::to_value(value)?)
}

fn client_info() -> Result<ClientInfo, serde_json::Error> {
    to_rmcp(json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": "marten", "version": env!("CARGO_PKG_VERSION")}
    }))
}

/// A host reached over MCP, whatever the transport
pub struct RemoteHost {
    id: String,
    kind: TransportKind,
    session: Mutex<Option<ClientSession>>,
    peer: Peer<RoleClient>,
    link: Arc<dyn HostLink>,
    tools: Vec<ToolDescriptor>,
    timeout: Duration,
}

impl fmt::Debug for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("tools", &self.tools.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteHost {
    /// Run the initialize handshake and pull the full tool list. The link is
    /// closed again if any step fails.
    pub(crate) async fn handshake<T, E, A>(
        id: &str,
        kind: TransportKind,
        transport: T,
        link: Arc<dyn HostLink>,
        timeout: Duration,
    ) -> Result<Self, HostError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match Self::start(id, transport, link.as_ref(), timeout).await {
            Ok((session, tools)) => {
                info!(host = %id, transport = %kind, tools = tools.len(), "Tool host ready");
                let peer = session.peer().clone();
                Ok(Self {
                    id: id.to_string(),
                    kind,
                    session: Mutex::new(Some(session)),
                    peer,
                    link,
                    tools,
                    timeout,
                })
            }
            Err(e) => {
                if let Err(close_err) = link.close().await {
                    debug!(host = %id, "Close after failed handshake: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn start<T, E, A>(
        id: &str,
        transport: T,
        link: &dyn HostLink,
        timeout: Duration,
    ) -> Result<(ClientSession, Vec<ToolDescriptor>), HostError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let info = client_info().map_err(|e| HostError::protocol(id, e))?;
        let session = match tokio::time::timeout(timeout, info.serve(transport)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(link.take_error().unwrap_or_else(|| HostError::ConnectFailed {
                    host: id.to_string(),
                    reason: format!("initialize failed: {}", e),
                }))
            }
            Err(_) => {
                return Err(HostError::Timeout {
                    host: id.to_string(),
                    timeout,
                })
            }
        };
        debug!(host = %id, "Initialized");

        let tools = match tokio::time::timeout(timeout, session.list_all_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                let err = link
                    .take_error()
                    .unwrap_or_else(|| HostError::protocol(id, format!("tools/list failed: {}", e)));
                stop(id, session).await;
                return Err(err);
            }
            Err(_) => {
                stop(id, session).await;
                return Err(HostError::Timeout {
                    host: id.to_string(),
                    timeout,
                });
            }
        };

        let mut descriptors = Vec::with_capacity(tools.len());
        for tool in tools {
            match to_rmcp::<_, Value>(&tool)
                .ok()
                .and_then(|entry| descriptor_from_listing(id, &entry))
            {
                Some(descriptor) => descriptors.push(descriptor),
                None => warn!(host = %id, "Skipping unreadable tool entry"),
            }
        }
        Ok((session, descriptors))
    }

    /// Bound a session call by the request timeout and map its failure
    async fn request<F, T, E>(&self, fut: F) -> Result<T, HostError>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.failure(e.to_string()).await),
            Err(_) => Err(HostError::Timeout {
                host: self.id.clone(),
                timeout: self.timeout,
            }),
        }
    }

    async fn failure(&self, reason: String) -> HostError {
        if let Some(closed) = self.link.closed() {
            if tokio::time::timeout(EXIT_SETTLE, closed.cancelled())
                .await
                .is_ok()
            {
                return HostError::Exited {
                    host: self.id.clone(),
                    reason,
                };
            }
        }
        self.link
            .take_error()
            .unwrap_or_else(|| HostError::transport(&self.id, reason))
    }
}

async fn stop(id: &str, session: ClientSession) {
    if let Err(e) = session.cancel().await {
        debug!(host = %id, "Session task ended abnormally: {}", e);
    }
}

fn descriptor_from_listing(host_id: &str, entry: &Value) -> Option<ToolDescriptor> {
    let name = entry["name"].as_str()?;
    let schema = match entry.get("inputSchema") {
        Some(schema) if schema.is_object() => schema.clone(),
        _ => json!({"type": "object", "properties": {}}),
    };
    Some(ToolDescriptor::new(
        name,
        entry["description"].as_str().unwrap_or_default(),
        schema,
        host_id,
    ))
}

/// Flatten a tools/call result into one output
fn render_call_result(result: &Value) -> ToolOutput {
    let parts: Vec<String> = result["content"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| match item["type"].as_str() {
                    Some("text") => item["text"].as_str().unwrap_or_default().to_string(),
                    Some(other) => format!("[{} content]", other),
                    None => item.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let content = if parts.is_empty() {
        match result.get("structuredContent") {
            Some(structured) if !structured.is_null() => structured.to_string(),
            _ => String::new(),
        }
    } else {
        parts.join("\n")
    };

    ToolOutput {
        content,
        is_error: result["isError"].as_bool().unwrap_or(false),
    }
}

#[async_trait]
impl ToolHost for RemoteHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    #[instrument(skip(self, input), fields(host = %self.id, tool = %name))]
    async fn call_tool(&self, name: &str, input: Value) -> Result<ToolOutput, HostError> {
        if !self.tools.iter().any(|t| t.name == name) {
            return Err(HostError::ToolNotFound(name.to_string()));
        }
        let params = to_rmcp(json!({"name": name, "arguments": input}))
            .map_err(|e| HostError::protocol(&self.id, e))?;
        let result = self.request(self.peer.call_tool(params)).await?;
        let result = to_rmcp::<_, Value>(&result).map_err(|e| HostError::protocol(&self.id, e))?;
        Ok(render_call_result(&result))
    }

    async fn shutdown(&self) -> Result<(), HostError> {
        if let Some(session) = self.session.lock().await.take() {
            stop(&self.id, session).await;
        }
        self.link.close().await
    }

    fn closed(&self) -> Option<CancellationToken> {
        self.link.closed()
    }
}
