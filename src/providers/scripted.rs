// Scripted backend for deterministic tests and offline runs
//
// Responses are popped from a FIFO queue; every request is recorded so tests
// can inspect what would have been sent.

use super::{ChunkReceiver, LlmProvider, ProviderRequest};
use crate::errors::BackendError;
use crate::stream::StreamDialect;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Body delivered as these chunks, then closed
    Chunks(Vec<Vec<u8>>),
    /// Chunks, then a transport failure mid-stream
    FailAfter(Vec<Vec<u8>>, String),
    /// Non-success status before any body
    Status(u16, String),
    /// Chunks, then the stream stays open until the receiver goes away
    Stall(Vec<Vec<u8>>),
}

impl ScriptedResponse {
    /// Single chunk holding the whole body
    pub fn body(body: impl Into<String>) -> Self {
        ScriptedResponse::Chunks(vec![body.into().into_bytes()])
    }

    /// Anthropic SSE body with only text
    pub fn anthropic_text(text: &str) -> Self {
        let mut sse = SseWriter::default();
        sse.text_block(0, text);
        sse.event(json!({"type": "message_stop"}));
        Self::body(sse.finish())
    }

    /// Anthropic SSE body: optional text, then one tool call whose arguments
    /// arrive as the given fragments
    pub fn anthropic_tool_call(text: &str, call_id: &str, tool: &str, fragments: &[&str]) -> Self {
        let mut sse = SseWriter::default();
        let mut index = 0;
        if !text.is_empty() {
            sse.text_block(index, text);
            index += 1;
        }
        sse.tool_block(index, call_id, tool, fragments);
        sse.event(json!({"type": "message_stop"}));
        Self::body(sse.finish())
    }
}

#[derive(Default)]
struct SseWriter {
    out: String,
}

impl SseWriter {
    fn event(&mut self, data: serde_json::Value) {
        self.out.push_str(&format!("data: {}\n\n", data));
    }

    fn text_block(&mut self, index: usize, text: &str) {
        self.event(json!({"type": "content_block_start", "index": index,
                          "content_block": {"type": "text", "text": ""}}));
        self.event(json!({"type": "content_block_delta", "index": index,
                          "delta": {"type": "text_delta", "text": text}}));
        self.event(json!({"type": "content_block_stop", "index": index}));
    }

    fn tool_block(&mut self, index: usize, call_id: &str, tool: &str, fragments: &[&str]) {
        self.event(json!({"type": "content_block_start", "index": index,
                          "content_block": {"type": "tool_use", "id": call_id, "name": tool, "input": {}}}));
        for fragment in fragments {
            self.event(json!({"type": "content_block_delta", "index": index,
                              "delta": {"type": "input_json_delta", "partial_json": fragment}}));
        }
        self.event(json!({"type": "content_block_stop", "index": index}));
    }

    fn finish(self) -> String {
        self.out
    }
}

pub struct ScriptedProvider {
    dialect: StreamDialect,
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl ScriptedProvider {
    pub fn new(dialect: StreamDialect, responses: Vec<ScriptedResponse>) -> Self {
        Self {
            dialect,
            responses: Mutex::new(VecDeque::from(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn push(&self, response: ScriptedResponse) {
        self.responses.lock().await.push_back(response);
    }

    /// Every request received so far, in order
    pub async fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn send_message_stream(
        &self,
        request: &ProviderRequest,
    ) -> Result<ChunkReceiver, BackendError> {
        self.requests.lock().await.push(request.clone());

        let Some(response) = self.responses.lock().await.pop_front() else {
            return Err(BackendError::Transport(
                "no scripted response left".to_string(),
            ));
        };

        let (chunks, tail) = match response {
            ScriptedResponse::Status(status, body) => {
                return Err(BackendError::Status { status, body })
            }
            ScriptedResponse::Chunks(chunks) => (chunks, None),
            ScriptedResponse::FailAfter(chunks, reason) => (chunks, Some(Some(reason))),
            ScriptedResponse::Stall(chunks) => (chunks, Some(None)),
        };

        let (tx, rx) = mpsc::channel(chunks.len() + 1);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            match tail {
                Some(Some(reason)) => {
                    let _ = tx.send(Err(BackendError::Stream(reason))).await;
                }
                Some(None) => tx.closed().await,
                None => {}
            }
        });
        Ok(rx)
    }

    fn dialect(&self) -> StreamDialect {
        self.dialect
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use crate::stream::{StreamDialectParser, StreamEvent};

    #[tokio::test]
    async fn test_scripted_tool_call_parses() {
        let provider = ScriptedProvider::new(
            StreamDialect::Anthropic,
            vec![ScriptedResponse::anthropic_tool_call(
                "ok",
                "c1",
                "bash",
                &["{\"command\":", "\"ls\"}"],
            )],
        );
        let mut rx = provider
            .send_message_stream(&ProviderRequest::new(vec![Message::user("x")]))
            .await
            .unwrap();

        let mut parser = StreamDialectParser::new(StreamDialect::Anthropic);
        let mut events = Vec::new();
        while let Some(chunk) = rx.recv().await {
            events.extend(parser.feed(&chunk.unwrap()));
        }
        events.extend(parser.flush());

        assert_eq!(events[0], StreamEvent::TextDelta("ok".into()));
        assert_eq!(events.len(), 6);
        assert_eq!(provider.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_script_is_transport_error() {
        let provider = ScriptedProvider::new(StreamDialect::Anthropic, vec![]);
        let err = provider
            .send_message_stream(&ProviderRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
