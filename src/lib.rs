// Marten - streaming, tool-augmented conversation engine
// Library exports

pub mod cli;
pub mod config;
pub mod conversation;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod providers;
pub mod stream;
pub mod tools;

pub use conversation::{Conversation, Message};
pub use errors::{BackendError, HostError, OrchestratorError};
pub use orchestrator::{ToolCallOrchestrator, TurnFragment, TurnOutcome};
