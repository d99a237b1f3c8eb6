// Human-in-the-loop approval gate
//
// The orchestrator asks the gate before any call without a remembered
// approval. Interactive front ends implement `ApprovalGate` themselves;
// the policies here cover non-interactive runs and tests.

use async_trait::async_trait;
use serde_json::Value;

/// What the user is being asked to approve
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub input: Value,
    /// Human-readable prompt
    pub message: String,
}

impl ApprovalRequest {
    pub fn new(tool_name: &str, input: &Value) -> Self {
        let rendered = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
        Self {
            tool_name: tool_name.to_string(),
            input: input.clone(),
            message: format!("Allow tool '{}' with input:\n{}", tool_name, rendered),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    /// Persist the approval for later identical calls
    pub remember: bool,
}

impl ApprovalDecision {
    pub fn once() -> Self {
        Self {
            approved: true,
            remember: false,
        }
    }

    pub fn always() -> Self {
        Self {
            approved: true,
            remember: true,
        }
    }

    pub fn deny() -> Self {
        Self {
            approved: false,
            remember: false,
        }
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn ask_approval(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Declines everything; for non-interactive environments
pub struct DenyAll;

#[async_trait]
impl ApprovalGate for DenyAll {
    async fn ask_approval(&self, request: &ApprovalRequest) -> ApprovalDecision {
        tracing::info!(tool = %request.tool_name, "Auto-denied tool call (non-interactive)");
        ApprovalDecision::deny()
    }
}

/// Approves everything for this call only (`features.auto_approve_tools`)
pub struct AllowAll;

#[async_trait]
impl ApprovalGate for AllowAll {
    async fn ask_approval(&self, request: &ApprovalRequest) -> ApprovalDecision {
        tracing::debug!(tool = %request.tool_name, "Auto-approved tool call");
        ApprovalDecision::once()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedApproval;

#[cfg(any(test, feature = "test-util"))]
mod scripted {
    use super::{ApprovalDecision, ApprovalGate, ApprovalRequest};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers from a fixed script and records every request it saw
    #[derive(Default)]
    pub struct ScriptedApproval {
        answers: Mutex<VecDeque<ApprovalDecision>>,
        seen: Mutex<Vec<ApprovalRequest>>,
    }

    impl ScriptedApproval {
        /// Once the answers run out every further request is denied
        pub fn new(answers: Vec<ApprovalDecision>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ApprovalRequest> {
            self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ApprovalGate for ScriptedApproval {
        async fn ask_approval(&self, request: &ApprovalRequest) -> ApprovalDecision {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(request.clone());
            }
            self.answers
                .lock()
                .ok()
                .and_then(|mut answers| answers.pop_front())
                .unwrap_or_else(ApprovalDecision::deny)
        }
    }
}
