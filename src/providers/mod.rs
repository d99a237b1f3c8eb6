// Model backend abstraction
//
// A backend takes the conversation plus tool schemas and returns the raw
// response body as a stream of byte chunks in one of the supported dialects.

use crate::errors::BackendError;
use crate::stream::StreamDialect;
use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

pub mod format;
pub mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod types;

pub use http::HttpProvider;
#[cfg(any(test, feature = "test-util"))]
pub use scripted::{ScriptedProvider, ScriptedResponse};
pub use types::ProviderRequest;

/// Raw response body chunks. The channel closes when the body ends.
pub type ChunkReceiver = Receiver<Result<Vec<u8>, BackendError>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send the request and stream the response body
    async fn send_message_stream(
        &self,
        request: &ProviderRequest,
    ) -> Result<ChunkReceiver, BackendError>;

    /// Wire dialect of the returned stream
    fn dialect(&self) -> StreamDialect;

    fn name(&self) -> &str;

    fn default_model(&self) -> &str;
}
