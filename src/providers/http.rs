// HTTP backend for all three stream dialects
//
// The response body is forwarded chunk by chunk; decoding happens in the
// orchestrator's StreamDialectParser, not here.

use super::format::request_body;
use super::types::ProviderRequest;
use super::{ChunkReceiver, LlmProvider};
use crate::config::BackendConfig;
use crate::errors::BackendError;
use crate::stream::StreamDialect;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT_SECS: u64 = 30;
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    dialect: StreamDialect,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl HttpProvider {
    pub fn new(
        dialect: StreamDialect,
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            dialect,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(
            config.dialect,
            config.base_url(),
            config.api_key.clone(),
            config.model(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        match self.dialect {
            StreamDialect::Anthropic => format!("{}/v1/messages", self.base_url),
            StreamDialect::OpenAi => format!("{}/v1/chat/completions", self.base_url),
            StreamDialect::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn build_request(&self, request: &ProviderRequest) -> reqwest::RequestBuilder {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        let body = request_body(self.dialect, request, model);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(&body);

        match (self.dialect, &self.api_key) {
            (StreamDialect::Anthropic, Some(key)) => {
                builder = builder
                    .header("x-api-key", key)
                    .header("anthropic-version", ANTHROPIC_VERSION);
            }
            (StreamDialect::Anthropic, None) => {
                builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
            }
            (_, Some(key)) => {
                builder = builder.header("Authorization", format!("Bearer {}", key));
            }
            (_, None) => {}
        }
        builder
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn send_message_stream(
        &self,
        request: &ProviderRequest,
    ) -> Result<ChunkReceiver, BackendError> {
        tracing::debug!(dialect = %self.dialect, url = %self.endpoint(), "Sending streaming request");

        let response = self.build_request(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let item = chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| BackendError::Stream(e.to_string()));
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
            tracing::debug!("Backend stream finished");
        });

        Ok(rx)
    }

    fn dialect(&self) -> StreamDialect {
        self.dialect
    }

    fn name(&self) -> &str {
        self.dialect.as_str()
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;

    async fn collect(mut rx: ChunkReceiver) -> Vec<u8> {
        let mut body = Vec::new();
        while let Some(chunk) = rx.recv().await {
            body.extend(chunk.unwrap());
        }
        body
    }

    #[tokio::test]
    async fn test_anthropic_stream_headers_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "sk-test")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model":"claude-test","stream":true}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"type\":\"message_stop\"}\n\n")
            .create_async()
            .await;

        let provider = HttpProvider::new(
            StreamDialect::Anthropic,
            server.url(),
            Some("sk-test".to_string()),
            "claude-test",
            Duration::from_secs(5),
        )
        .unwrap();

        let rx = provider
            .send_message_stream(&ProviderRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        let body = collect(rx).await;
        assert!(String::from_utf8(body).unwrap().contains("message_stop"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let provider = HttpProvider::new(
            StreamDialect::Ollama,
            server.url(),
            None,
            "llama3.1",
            Duration::from_secs(5),
        )
        .unwrap();

        let err = provider
            .send_message_stream(&ProviderRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap_err();
        match err {
            BackendError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_openai_bearer_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-openai")
            .with_status(200)
            .with_body("data: [DONE]\n\n")
            .create_async()
            .await;

        let provider = HttpProvider::new(
            StreamDialect::OpenAi,
            format!("{}/", server.url()),
            Some("sk-openai".to_string()),
            "gpt-test",
            Duration::from_secs(5),
        )
        .unwrap();

        let rx = provider
            .send_message_stream(&ProviderRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        collect(rx).await;
        mock.assert_async().await;
    }
}
