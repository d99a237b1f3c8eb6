// Tool hosts - providers of named tools behind one interface
//
// A host is reached through one of four transports. The manager owns the
// connected set and the merged registry; everything else talks to hosts only
// through the `ToolHost` trait.

mod config;
mod manager;
mod network;
mod process;
mod rpc;
#[cfg(any(test, feature = "test-util"))]
mod static_host;

pub use config::{expand_env_vars, HostConfig, TransportKind};
pub use manager::{
    DefaultHostFactory, DisconnectReport, HostConnection, HostFactory, HostObserver, HostOutcome,
    HostStatus, ReloadReport, ToolHostManager,
};
pub use network::{connect_network_request, connect_network_stream};
pub use process::connect_child_process;
pub use rpc::{RemoteHost, PROTOCOL_VERSION};
#[cfg(any(test, feature = "test-util"))]
pub use static_host::StaticHost;

use crate::errors::HostError;
use crate::tools::types::{ToolDescriptor, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// A connected provider of tools
#[async_trait]
pub trait ToolHost: Send + Sync {
    fn id(&self) -> &str;

    fn transport_kind(&self) -> TransportKind;

    /// Tools advertised at connect time
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Run a tool. Tool-level failures are `Ok` outputs with `is_error`
    /// set; `Err` means the host itself could not serve the call.
    async fn call_tool(&self, name: &str, input: Value) -> Result<ToolOutput, HostError>;

    /// Release transport resources
    async fn shutdown(&self) -> Result<(), HostError>;

    /// Cancelled when the host goes away on its own (process exit, stream end)
    fn closed(&self) -> Option<CancellationToken> {
        None
    }
}
