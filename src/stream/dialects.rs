// Per-dialect record mapping
//
// Each mapper sees one decoded JSON record at a time and appends the
// StreamEvents it implies. Unknown record types are ignored. Ordering rules
// (implicit closes, duplicate suppression) are enforced by the parser, not here.

use super::events::{StreamDialect, StreamEvent};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) enum RecordMapper {
    Anthropic(AnthropicRecords),
    OpenAi(OpenAiRecords),
    Ollama(OllamaRecords),
}

impl RecordMapper {
    pub(crate) fn for_dialect(dialect: StreamDialect) -> Self {
        match dialect {
            StreamDialect::Anthropic => RecordMapper::Anthropic(AnthropicRecords::default()),
            StreamDialect::OpenAi => RecordMapper::OpenAi(OpenAiRecords::default()),
            StreamDialect::Ollama => RecordMapper::Ollama(OllamaRecords::default()),
        }
    }

    pub(crate) fn map(&mut self, record: &Value, out: &mut Vec<StreamEvent>) {
        match self {
            RecordMapper::Anthropic(m) => m.map(record, out),
            RecordMapper::OpenAi(m) => m.map(record, out),
            RecordMapper::Ollama(m) => m.map(record, out),
        }
    }

    /// Sentinel `data: [DONE]` line
    pub(crate) fn done(&mut self, out: &mut Vec<StreamEvent>) {
        if let RecordMapper::OpenAi(m) = self {
            m.finish(out);
        }
    }
}

/// Anthropic Messages API events. Tool blocks are tracked by content block index.
#[derive(Debug, Default)]
pub(crate) struct AnthropicRecords {
    tool_blocks: HashMap<u64, String>,
}

impl AnthropicRecords {
    fn map(&mut self, record: &Value, out: &mut Vec<StreamEvent>) {
        let Some(kind) = record["type"].as_str() else {
            return;
        };
        let index = record["index"].as_u64().unwrap_or(0);

        match kind {
            "content_block_start" => {
                let block = &record["content_block"];
                match block["type"].as_str() {
                    Some("tool_use") => {
                        let (Some(id), Some(name)) = (block["id"].as_str(), block["name"].as_str())
                        else {
                            debug!("tool_use block without id or name, skipping");
                            return;
                        };
                        self.tool_blocks.insert(index, id.to_string());
                        out.push(StreamEvent::ToolCallStart {
                            call_id: id.to_string(),
                            tool_name: name.to_string(),
                        });
                    }
                    Some("text") => {
                        if let Some(text) = block["text"].as_str() {
                            out.push(StreamEvent::TextDelta(text.to_string()));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let delta = &record["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = delta["text"].as_str() {
                            out.push(StreamEvent::TextDelta(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(call_id), Some(fragment)) = (
                            self.tool_blocks.get(&index),
                            delta["partial_json"].as_str(),
                        ) {
                            out.push(StreamEvent::ToolCallArgDelta {
                                call_id: call_id.clone(),
                                fragment: fragment.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some(call_id) = self.tool_blocks.remove(&index) {
                    out.push(StreamEvent::ToolCallEnd { call_id });
                }
            }
            "message_stop" => {
                self.tool_blocks.clear();
                out.push(StreamEvent::TurnEnd);
            }
            "error" => {
                warn!(
                    error_type = record["error"]["type"].as_str().unwrap_or("unknown"),
                    "Backend reported a stream error: {}",
                    record["error"]["message"].as_str().unwrap_or("")
                );
            }
            _ => {}
        }
    }
}

/// OpenAI-compatible chat completion chunks. Tool calls are keyed by `index`;
/// only the first chunk of a call carries its id and name.
#[derive(Debug, Default)]
pub(crate) struct OpenAiRecords {
    calls: HashMap<u64, String>,
}

impl OpenAiRecords {
    fn map(&mut self, record: &Value, out: &mut Vec<StreamEvent>) {
        let Some(choice) = record["choices"].get(0) else {
            return;
        };
        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            out.push(StreamEvent::TextDelta(text.to_string()));
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for call in tool_calls {
                let index = call["index"].as_u64().unwrap_or(0);
                let function = &call["function"];

                if !self.calls.contains_key(&index) {
                    let Some(name) = function["name"].as_str().filter(|n| !n.is_empty()) else {
                        debug!(index, "tool call fragment before its name, skipping");
                        continue;
                    };
                    let call_id = call["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", index));
                    self.calls.insert(index, call_id.clone());
                    out.push(StreamEvent::ToolCallStart {
                        call_id,
                        tool_name: name.to_string(),
                    });
                }

                if let (Some(call_id), Some(fragment)) =
                    (self.calls.get(&index), function["arguments"].as_str())
                {
                    out.push(StreamEvent::ToolCallArgDelta {
                        call_id: call_id.clone(),
                        fragment: fragment.to_string(),
                    });
                }
            }
        }

        if choice["finish_reason"].is_string() {
            self.finish(out);
        }
    }

    fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        self.calls.clear();
        out.push(StreamEvent::TurnEnd);
    }
}

/// Ollama chat NDJSON. Tool calls arrive whole, so each one expands to
/// start, a single argument fragment, and end.
#[derive(Debug, Default)]
pub(crate) struct OllamaRecords {
    next_call: usize,
}

impl OllamaRecords {
    fn map(&mut self, record: &Value, out: &mut Vec<StreamEvent>) {
        if let Some(error) = record["error"].as_str() {
            warn!("Backend reported a stream error: {}", error);
        }

        let message = &record["message"];
        if let Some(text) = message["content"].as_str() {
            out.push(StreamEvent::TextDelta(text.to_string()));
        }

        if let Some(tool_calls) = message["tool_calls"].as_array() {
            for call in tool_calls {
                let function = &call["function"];
                let Some(name) = function["name"].as_str() else {
                    debug!("tool call without a function name, skipping");
                    continue;
                };
                let call_id = match call["id"].as_str() {
                    Some(id) => id.to_string(),
                    None => format!("call_{}", self.next_call),
                };
                self.next_call += 1;

                let fragment = match &function["arguments"] {
                    Value::String(raw) => raw.clone(),
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                };

                out.push(StreamEvent::ToolCallStart {
                    call_id: call_id.clone(),
                    tool_name: name.to_string(),
                });
                out.push(StreamEvent::ToolCallArgDelta {
                    call_id: call_id.clone(),
                    fragment,
                });
                out.push(StreamEvent::ToolCallEnd { call_id });
            }
        }

        if record["done"].as_bool() == Some(true) {
            out.push(StreamEvent::TurnEnd);
        }
    }
}
