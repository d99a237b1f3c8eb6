// Typed errors for the conversation engine
//
// Backend and host failures are operational errors the caller may need to
// match on. Everything that can be folded back into the conversation (bad
// tool arguments, tool failures, declined approvals) never becomes one of these.

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the model backend. Fatal to the current round.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to reach backend: {0}")]
    Transport(String),

    #[error("backend request failed\n\nStatus: {status}\nBody: {body}")]
    Status { status: u16, body: String },

    #[error("backend stream interrupted: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Failure in the tool host layer.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("host '{0}' is not connected")]
    HostNotConnected(String),

    #[error("host '{0}' is disabled")]
    HostDisabled(String),

    #[error("invalid configuration for host '{host}': {reason}")]
    InvalidConfig { host: String, reason: String },

    #[error("failed to connect to host '{host}': {reason}")]
    ConnectFailed { host: String, reason: String },

    #[error("transport error on host '{host}': {reason}")]
    Transport { host: String, reason: String },

    #[error("protocol error on host '{host}': {reason}")]
    Protocol { host: String, reason: String },

    #[error("host '{host}' exited: {reason}")]
    Exited { host: String, reason: String },

    #[error("request to host '{host}' timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },
}

impl HostError {
    pub fn transport(host: &str, reason: impl ToString) -> Self {
        HostError::Transport {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol(host: &str, reason: impl ToString) -> Self {
        HostError::Protocol {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Terminal errors of a conversation turn.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("stopped after {0} tool rounds without a final answer")]
    RoundLimit(usize),

    #[error("turn cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_not_found_message() {
        let err = HostError::ToolNotFound("file_list".to_string());
        assert_eq!(err.to_string(), "tool 'file_list' not found");
    }

    #[test]
    fn test_backend_error_converts_into_orchestrator_error() {
        let err: OrchestratorError = BackendError::Status {
            status: 529,
            body: "overloaded".to_string(),
        }
        .into();
        assert!(matches!(err, OrchestratorError::Backend(_)));
        assert!(err.to_string().contains("529"));
    }
}
