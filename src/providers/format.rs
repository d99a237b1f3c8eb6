// Request body construction for each backend dialect

use super::types::ProviderRequest;
use crate::conversation::{ContentBlock, Message, MessageContent, Role};
use crate::stream::StreamDialect;
use serde::Serialize;
use serde_json::{json, Value};

pub fn request_body(dialect: StreamDialect, request: &ProviderRequest, model: &str) -> Value {
    match dialect {
        StreamDialect::Anthropic => anthropic_body(request, model),
        StreamDialect::OpenAi => openai_body(request, model),
        StreamDialect::Ollama => ollama_body(request, model),
    }
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

/// Conversation types already serialize in Messages API shape
fn anthropic_body(request: &ProviderRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens,
        "messages": request.messages,
        "stream": true,
    });

    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(tools) = &request.tools {
        let tools: Vec<AnthropicTool> = tools
            .iter()
            .map(|t| AnthropicTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.input_schema,
            })
            .collect();
        body["tools"] = json!(tools);
    }
    body
}

fn openai_body(request: &ProviderRequest, model: &str) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for msg in &request.messages {
        match msg.role {
            Role::Assistant => {
                // tool_calls must ride on the assistant message or the results are orphaned
                let tool_calls: Vec<Value> = msg
                    .tool_uses()
                    .into_iter()
                    .map(|t| {
                        json!({
                            "id": t.id,
                            "type": "function",
                            "function": {"name": t.name, "arguments": t.input.to_string()},
                        })
                    })
                    .collect();

                let mut out = json!({"role": "assistant"});
                let text = msg.text();
                out["content"] = if text.is_empty() { Value::Null } else { json!(text) };
                if !tool_calls.is_empty() {
                    out["tool_calls"] = json!(tool_calls);
                }
                messages.push(out);
            }
            Role::User => {
                push_user_turn(msg, &mut messages, |tool_use_id, content| {
                    json!({"role": "tool", "tool_call_id": tool_use_id, "content": content})
                });
            }
        }
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens,
        "stream": true,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(tools) = &request.tools {
        body["tools"] = json!(function_tools(tools));
    }
    body
}

fn ollama_body(request: &ProviderRequest, model: &str) -> Value {
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = &request.system {
        messages.push(json!({"role": "system", "content": system}));
    }

    for msg in &request.messages {
        match msg.role {
            Role::Assistant => {
                let mut out = json!({"role": "assistant", "content": msg.text()});
                let tool_calls: Vec<Value> = msg
                    .tool_uses()
                    .into_iter()
                    .map(|t| json!({"function": {"name": t.name, "arguments": t.input}}))
                    .collect();
                if !tool_calls.is_empty() {
                    out["tool_calls"] = json!(tool_calls);
                }
                messages.push(out);
            }
            Role::User => {
                push_user_turn(msg, &mut messages, |_, content| {
                    json!({"role": "tool", "content": content})
                });
            }
        }
    }

    let mut options = json!({"num_predict": request.max_tokens});
    if let Some(temperature) = request.temperature {
        options["temperature"] = json!(temperature);
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": true,
        "options": options,
    });
    if let Some(tools) = &request.tools {
        body["tools"] = json!(function_tools(tools));
    }
    body
}

/// User turns split into a text message plus one message per tool result
fn push_user_turn(
    msg: &Message,
    messages: &mut Vec<Value>,
    tool_message: impl Fn(&str, &str) -> Value,
) {
    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            messages.push(json!({"role": "user", "content": text}));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let text: Vec<&str> = blocks.iter().filter_map(|b| b.as_text()).collect();
    let text = text.join("\n");
    if !text.trim().is_empty() {
        messages.push(json!({"role": "user", "content": text}));
    }

    for block in blocks {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } = block
        {
            let content = if content.trim().is_empty() {
                "(no output)"
            } else {
                content.as_str()
            };
            messages.push(tool_message(tool_use_id, content));
        }
    }
}

fn function_tools(tools: &[crate::tools::ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                },
            })
        })
        .collect()
}
