// Backend-agnostic request type
//
// Each dialect turns this into its own wire body (see `format`).

use crate::conversation::{ContentBlock, Message, MessageContent, Role};
use crate::tools::ToolDescriptor;

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<Message>,

    /// Model name; empty means the provider's default
    pub model: String,

    pub max_tokens: u32,

    /// Sent as `system` for Anthropic, prepended as a system message otherwise
    pub system: Option<String>,

    pub tools: Option<Vec<ToolDescriptor>>,

    pub temperature: Option<f32>,
}

impl ProviderRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: String::new(),
            max_tokens: 4096,
            system: None,
            tools: None,
            temperature: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach tool schemas. An empty list is sent as no tools at all.
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Remove orphaned tool_use blocks from the end of the conversation.
    ///
    /// A cancelled or failed round can leave an assistant message whose tool
    /// invocations were never answered; backends reject such histories.
    pub fn sanitize_messages(&mut self) {
        loop {
            let Some(last_assistant_idx) = self
                .messages
                .iter()
                .rposition(|m| m.role == Role::Assistant)
            else {
                break;
            };

            let tool_use_ids: Vec<String> = self.messages[last_assistant_idx]
                .tool_uses()
                .into_iter()
                .map(|t| t.id)
                .collect();

            if tool_use_ids.is_empty() {
                break;
            }

            let next_idx = last_assistant_idx + 1;
            let answered = |id: &String| {
                self.messages.get(next_idx).is_some_and(|next| {
                    matches!(&next.content, MessageContent::Blocks(blocks) if blocks.iter().any(|b| {
                        matches!(b, ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == id)
                    }))
                })
            };

            if tool_use_ids.iter().all(answered) {
                break;
            }

            if next_idx < self.messages.len()
                && self.messages[next_idx].role == Role::User
                && self.messages[next_idx]
                    .blocks()
                    .iter()
                    .any(|b| b.is_tool_result())
            {
                self.messages.remove(next_idx);
            }
            self.messages.remove(last_assistant_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ToolResult, ToolUse};
    use serde_json::json;

    fn tool_use(id: &str) -> ContentBlock {
        ToolUse {
            id: id.to_string(),
            name: "bash".to_string(),
            input: json!({}),
        }
        .into()
    }

    #[test]
    fn test_sanitize_drops_unanswered_tool_use() {
        let mut request = ProviderRequest::new(vec![
            Message::user("hi"),
            Message::with_blocks(Role::Assistant, vec![tool_use("a")]),
        ]);
        request.sanitize_messages();
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_sanitize_keeps_answered_tool_use() {
        let mut request = ProviderRequest::new(vec![
            Message::user("hi"),
            Message::with_blocks(Role::Assistant, vec![tool_use("a")]),
            Message::with_blocks(
                Role::User,
                vec![ToolResult::success("a".into(), "ok".into()).into()],
            ),
        ]);
        request.sanitize_messages();
        assert_eq!(request.messages.len(), 3);
    }

    #[test]
    fn test_with_empty_tools_is_none() {
        let request = ProviderRequest::new(vec![]).with_tools(vec![]);
        assert!(request.tools.is_none());
    }
}
