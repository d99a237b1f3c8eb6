// http_request - makes an HTTP request and returns status plus body
//
// Only http and https URLs are accepted. Response bodies are cut at 50 KB.

use super::{truncate_to_boundary, Tool};
use crate::tools::types::{ToolInputSchema, ToolOutput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

const MAX_RESPONSE_BYTES: usize = 50 * 1024;
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct HttpRequestTool {
    client: Client,
}

impl HttpRequestTool {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request and return the status and response body"
    }

    fn input_schema(&self) -> ToolInputSchema {
        ToolInputSchema {
            schema_type: "object".to_string(),
            properties: serde_json::json!({
                "url": {
                    "type": "string",
                    "description": "The URL to request"
                },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD"],
                    "description": "HTTP method (default GET)"
                },
                "headers": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "HTTP headers as key-value pairs"
                },
                "body": {
                    "type": "string",
                    "description": "Request body (for POST, PUT, PATCH)"
                }
            }),
            required: vec!["url".to_string()],
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let url = input["url"].as_str().context("Missing url parameter")?;
        let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Ok(ToolOutput::error(format!(
                "URL scheme '{}' not allowed. Only http and https are supported.",
                scheme
            )));
        }

        let method_str = input["method"].as_str().unwrap_or("GET");
        let method: reqwest::Method = method_str
            .parse()
            .with_context(|| format!("Invalid HTTP method: {}", method_str))?;

        let mut request = self.client.request(method, parsed);
        if let Some(headers) = input["headers"].as_object() {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }
        if let Some(body) = input["body"].as_str() {
            request = request.body(body.to_string());
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("HTTP request to {} failed", url))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        let body = if body.len() > MAX_RESPONSE_BYTES {
            format!(
                "{}...\n\n[Response truncated from {} to {} bytes]",
                truncate_to_boundary(&body, MAX_RESPONSE_BYTES),
                body.len(),
                MAX_RESPONSE_BYTES
            )
        } else {
            body
        };

        Ok(ToolOutput {
            content: format!("HTTP {}\n\n{}", status, body),
            is_error: status.is_client_error() || status.is_server_error(),
        })
    }
}
