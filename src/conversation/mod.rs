// Conversation state shared by the orchestrator and the backends

pub mod types;

pub use types::{Conversation, ContentBlock, Message, MessageContent, Role, ToolResult, ToolUse};
