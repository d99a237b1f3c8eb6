// Tool calls under assembly

use serde_json::Value;

/// A tool call whose arguments are still arriving
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arg_text: String,
}

impl PendingToolCall {
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arg_text: String::new(),
        }
    }

    pub fn push_fragment(&mut self, fragment: &str) {
        self.arg_text.push_str(fragment);
    }

    /// Parse the accumulated arguments. No text at all means `{}`; anything
    /// other than a JSON object is rejected.
    pub fn parse_input(&self) -> Result<Value, String> {
        if self.arg_text.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        match serde_json::from_str::<Value>(&self.arg_text) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(other) => Err(format!("expected a JSON object, got {}", kind(&other))),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Open calls in the order they started
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: Vec<PendingToolCall>,
}

impl PendingCalls {
    pub(crate) fn open(&mut self, call_id: &str, tool_name: &str) {
        if self.calls.iter().any(|c| c.call_id == call_id) {
            return;
        }
        self.calls.push(PendingToolCall::new(call_id, tool_name));
    }

    /// Returns false when no call with this id is open
    pub(crate) fn append(&mut self, call_id: &str, fragment: &str) -> bool {
        match self.calls.iter_mut().find(|c| c.call_id == call_id) {
            Some(call) => {
                call.push_fragment(fragment);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take(&mut self, call_id: &str) -> Option<PendingToolCall> {
        let index = self.calls.iter().position(|c| c.call_id == call_id)?;
        Some(self.calls.remove(index))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
