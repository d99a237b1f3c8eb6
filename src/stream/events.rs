// Structured protocol events produced from a backend byte stream

use serde::{Deserialize, Serialize};

/// One event of a model response.
///
/// Arg deltas for a call always arrive between its start and end, and every
/// started call is ended before `TurnEnd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallStart { call_id: String, tool_name: String },
    ToolCallArgDelta { call_id: String, fragment: String },
    ToolCallEnd { call_id: String },
    TurnEnd,
}

impl StreamEvent {
    pub fn call_id(&self) -> Option<&str> {
        match self {
            StreamEvent::ToolCallStart { call_id, .. }
            | StreamEvent::ToolCallArgDelta { call_id, .. }
            | StreamEvent::ToolCallEnd { call_id } => Some(call_id),
            _ => None,
        }
    }
}

/// Wire dialect of a backend stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDialect {
    /// Anthropic Messages API server-sent events
    #[default]
    Anthropic,
    /// OpenAI-compatible chat completions server-sent events
    #[serde(alias = "openai-compatible")]
    OpenAi,
    /// Ollama newline-delimited JSON
    Ollama,
}

/// How records are framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `data: {...}` lines
    Sse,
    /// One JSON object per line
    Ndjson,
}

impl StreamDialect {
    pub fn framing(&self) -> Framing {
        match self {
            StreamDialect::Anthropic | StreamDialect::OpenAi => Framing::Sse,
            StreamDialect::Ollama => Framing::Ndjson,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamDialect::Anthropic => "anthropic",
            StreamDialect::OpenAi => "openai",
            StreamDialect::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for StreamDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
