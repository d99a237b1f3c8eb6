// Network host transports
//
// Both hand rmcp a message sink and a message stream.
//
// network-request: every message is its own HTTP POST; replies come back as
// JSON or as an SSE-framed body. The server's `Mcp-Session-Id` is echoed on
// later requests and the session is DELETEd on shutdown.
//
// network-stream: a GET opens a long-lived SSE stream whose first `endpoint`
// event names where to POST messages. Replies arrive as `message` events.

use super::config::HostConfig;
use super::rpc::{HostLink, RemoteHost};
use super::TransportKind;
use crate::errors::HostError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::channel::mpsc;
use futures::{Sink, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SESSION_HEADER: &str = "Mcp-Session-Id";
const CONNECT_TIMEOUT_SECS: u64 = 30;

type MessageSink = Pin<Box<dyn Sink<ClientJsonRpcMessage, Error = io::Error> + Send>>;

/// Connect a host that takes one POST per message
pub async fn connect_network_request(
    host_id: &str,
    config: &HostConfig,
) -> Result<RemoteHost, HostError> {
    let (tx, rx) = mpsc::unbounded();
    let link = Arc::new(RequestLink {
        host_id: host_id.to_string(),
        client: build_client(host_id)?,
        url: required_url(host_id, config)?,
        headers: config.headers.clone(),
        session_id: Mutex::new(None),
        inbox: Inbox::new(host_id, tx),
    });
    RemoteHost::handshake(
        host_id,
        TransportKind::NetworkRequest,
        (message_sink(link.clone()), rx),
        link,
        config.request_timeout(),
    )
    .await
}

/// Connect a host behind an SSE stream
pub async fn connect_network_stream(
    host_id: &str,
    config: &HostConfig,
) -> Result<RemoteHost, HostError> {
    let (tx, rx) = mpsc::unbounded();
    let link = Arc::new(StreamLink::open(host_id, config, Inbox::new(host_id, tx)).await?);
    RemoteHost::handshake(
        host_id,
        TransportKind::NetworkStream,
        (message_sink(link.clone()), rx),
        link,
        config.request_timeout(),
    )
    .await
}

fn build_client(host_id: &str) -> Result<Client, HostError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| HostError::ConnectFailed {
            host: host_id.to_string(),
            reason: format!("failed to create HTTP client: {}", e),
        })
}

fn required_url(host_id: &str, config: &HostConfig) -> Result<String, HostError> {
    config.url.clone().ok_or_else(|| HostError::InvalidConfig {
        host: host_id.to_string(),
        reason: format!("{} transport requires 'url'", config.transport),
    })
}

fn with_headers(mut request: RequestBuilder, headers: &BTreeMap<String, String>) -> RequestBuilder {
    for (key, value) in headers {
        request = request.header(key.as_str(), value.as_str());
    }
    request
}

/// Outbound half of a network transport
#[async_trait]
trait Outbound: Send + Sync + 'static {
    async fn send(&self, message: ClientJsonRpcMessage);
}

fn message_sink<L: Outbound>(link: Arc<L>) -> MessageSink {
    Box::pin(futures::sink::unfold(
        link,
        |link, message: ClientJsonRpcMessage| async move {
            link.send(message).await;
            Ok::<_, io::Error>(link)
        },
    ))
}

/// Messages from the server on their way to the session, plus the last
/// failure seen talking to it
struct Inbox {
    host_id: String,
    tx: mpsc::UnboundedSender<ServerJsonRpcMessage>,
    last_error: Mutex<Option<HostError>>,
}

impl Inbox {
    fn new(host_id: &str, tx: mpsc::UnboundedSender<ServerJsonRpcMessage>) -> Self {
        Self {
            host_id: host_id.to_string(),
            tx,
            last_error: Mutex::new(None),
        }
    }

    fn deliver(&self, data: &str) {
        let messages = match serde_json::from_str::<Value>(data) {
            Ok(Value::Array(batch)) => batch,
            Ok(message) => vec![message],
            Err(e) => {
                debug!(host = %self.host_id, "Ignoring malformed message: {}", e);
                return;
            }
        };
        for message in messages {
            match serde_json::from_value::<ServerJsonRpcMessage>(message) {
                Ok(message) => {
                    if self.tx.unbounded_send(message).is_err() {
                        debug!(host = %self.host_id, "Session gone, dropping message");
                    }
                }
                Err(e) => debug!(host = %self.host_id, "Ignoring unknown message: {}", e),
            }
        }
    }

    /// Record a send failure. A request gets an error reply so its caller
    /// does not wait out the timeout.
    fn fail(&self, sent: &Value, error: HostError) {
        warn!(host = %self.host_id, "{}", error);
        if let (Some(id), Some(_)) = (sent.get("id"), sent.get("method")) {
            let reply = json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32603, "message": error.to_string()}
            });
            self.deliver(&reply.to_string());
        }
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error);
        }
    }

    fn take_error(&self) -> Option<HostError> {
        self.last_error.lock().ok().and_then(|mut last| last.take())
    }

    /// End the message stream so the session stops
    fn close(&self) {
        self.tx.close_channel();
    }
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

struct RequestLink {
    host_id: String,
    client: Client,
    url: String,
    headers: BTreeMap<String, String>,
    session_id: Mutex<Option<String>>,
    inbox: Inbox,
}

impl RequestLink {
    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    async fn exchange(&self, body: &Value) -> Result<(), HostError> {
        let mut request = with_headers(self.client.post(&self.url), &self.headers)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HostError::transport(&self.host_id, e))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut current) = self.session_id.lock() {
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HostError::transport(
                &self.host_id,
                format!("HTTP {}: {}", status, body),
            ));
        }
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        if is_event_stream(&response) {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| HostError::transport(&self.host_id, e))?;
                if event.event.is_empty() || event.event == "message" {
                    self.inbox.deliver(&event.data);
                }
            }
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| HostError::transport(&self.host_id, e))?;
            if !body.trim().is_empty() {
                self.inbox.deliver(&body);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Outbound for RequestLink {
    async fn send(&self, message: ClientJsonRpcMessage) {
        let body = match serde_json::to_value(&message) {
            Ok(body) => body,
            Err(e) => {
                warn!(host = %self.host_id, "Unserializable message: {}", e);
                return;
            }
        };
        if let Err(e) = self.exchange(&body).await {
            self.inbox.fail(&body, e);
        }
    }
}

#[async_trait]
impl HostLink for RequestLink {
    /// End the server-side session, if one was assigned
    async fn close(&self) -> Result<(), HostError> {
        self.inbox.close();
        let Some(session) = self.session_id() else {
            return Ok(());
        };
        let request = with_headers(self.client.delete(&self.url), &self.headers)
            .header(SESSION_HEADER, session);
        if let Err(e) = request.send().await {
            debug!(host = %self.host_id, "Session DELETE failed: {}", e);
        }
        Ok(())
    }

    fn take_error(&self) -> Option<HostError> {
        self.inbox.take_error()
    }
}

struct StreamLink {
    host_id: String,
    client: Client,
    endpoint: Url,
    headers: BTreeMap<String, String>,
    inbox: Arc<Inbox>,
    closed: CancellationToken,
}

impl StreamLink {
    /// Open the event stream and wait for its endpoint event
    async fn open(host_id: &str, config: &HostConfig, inbox: Inbox) -> Result<Self, HostError> {
        let url = required_url(host_id, config)?;
        let client = build_client(host_id)?;
        let timeout = config.request_timeout();
        let connect_failed = |reason: String| HostError::ConnectFailed {
            host: host_id.to_string(),
            reason,
        };

        let request =
            with_headers(client.get(&url), &config.headers).header(ACCEPT, "text/event-stream");
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| connect_failed("timed out opening event stream".to_string()))?
            .map_err(|e| connect_failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(connect_failed(format!(
                "event stream returned HTTP {}",
                response.status()
            )));
        }

        let base = response.url().clone();
        let mut events = response.bytes_stream().eventsource();

        let first_endpoint = async {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event == "endpoint" => return Ok(event.data),
                    Ok(event) => debug!(host = %host_id, event = %event.event, "Ignoring event before endpoint"),
                    Err(e) => return Err(format!("event stream error: {}", e)),
                }
            }
            Err("event stream ended before the endpoint event".to_string())
        };
        let path = tokio::time::timeout(timeout, first_endpoint)
            .await
            .map_err(|_| connect_failed("no endpoint event received".to_string()))?
            .map_err(connect_failed)?;
        let endpoint = base
            .join(path.trim())
            .map_err(|e| connect_failed(format!("invalid endpoint '{}': {}", path, e)))?;
        debug!(host = %host_id, %endpoint, "Event stream ready");

        let inbox = Arc::new(inbox);
        let closed = CancellationToken::new();
        {
            let host_id = host_id.to_string();
            let inbox = Arc::clone(&inbox);
            let closed = closed.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        _ = closed.cancelled() => break,
                        event = events.next() => event,
                    };
                    match event {
                        Some(Ok(event)) if event.event.is_empty() || event.event == "message" => {
                            inbox.deliver(&event.data);
                        }
                        Some(Ok(event)) => {
                            debug!(host = %host_id, event = %event.event, "Ignoring event")
                        }
                        Some(Err(e)) => {
                            warn!(host = %host_id, "Event stream error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                info!(host = %host_id, "Event stream closed");
                inbox.close();
                closed.cancel();
            });
        }

        Ok(Self {
            host_id: host_id.to_string(),
            client,
            endpoint,
            headers: config.headers.clone(),
            inbox,
            closed,
        })
    }

    async fn post(&self, body: &Value) -> Result<(), HostError> {
        if self.closed.is_cancelled() {
            return Err(HostError::Exited {
                host: self.host_id.clone(),
                reason: "event stream closed".to_string(),
            });
        }
        let response = with_headers(self.client.post(self.endpoint.clone()), &self.headers)
            .json(body)
            .send()
            .await
            .map_err(|e| HostError::transport(&self.host_id, e))?;
        if !response.status().is_success() {
            return Err(HostError::transport(
                &self.host_id,
                format!("HTTP {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Outbound for StreamLink {
    async fn send(&self, message: ClientJsonRpcMessage) {
        let body = match serde_json::to_value(&message) {
            Ok(body) => body,
            Err(e) => {
                warn!(host = %self.host_id, "Unserializable message: {}", e);
                return;
            }
        };
        if let Err(e) = self.post(&body).await {
            self.inbox.fail(&body, e);
        }
    }
}

#[async_trait]
impl HostLink for StreamLink {
    async fn close(&self) -> Result<(), HostError> {
        self.closed.cancel();
        self.inbox.close();
        Ok(())
    }

    fn closed(&self) -> Option<CancellationToken> {
        Some(self.closed.clone())
    }

    fn take_error(&self) -> Option<HostError> {
        self.inbox.take_error()
    }
}
