// Tool-call orchestration
//
// Drives rounds against the backend: stream, assemble tool calls, gate them
// through permissions and approval, execute them one at a time in discovery
// order, feed results back, repeat until the model answers without tools.

mod pending;
mod turn;

pub use pending::PendingToolCall;
pub use turn::{OrchestratorSettings, ToolCallOrchestrator};

use serde_json::Value;

/// Progress reported while a turn runs
#[derive(Debug, Clone, PartialEq)]
pub enum TurnFragment {
    /// Assistant text as it streams in
    Text(String),
    /// A call was finalized and is about to be gated
    ToolRequested {
        call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolDeclined {
        call_id: String,
        tool_name: String,
    },
    ToolCompleted {
        call_id: String,
        tool_name: String,
        is_error: bool,
        content: String,
    },
    RoundFinished {
        round: usize,
        tool_calls: usize,
    },
}

/// Summary of a finished turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Backend requests made
    pub rounds: usize,
    /// Text of the last assistant message
    pub final_text: String,
    /// Tool calls across all rounds
    pub tool_calls: usize,
}
