// StreamDialectParser - raw backend bytes to StreamEvents
//
// Records are split out of a carry buffer, decoded tolerantly (bad JSON is
// dropped), mapped by the dialect, then sequenced so the event invariants
// hold no matter what the backend sent:
//   - arg deltas and ends only for open calls
//   - open calls are closed before TurnEnd
//   - no repeated TurnEnd, no empty text deltas

use super::buffer::LineBuffer;
use super::dialects::RecordMapper;
use super::events::{Framing, StreamDialect, StreamEvent};
use serde_json::Value;
use tracing::debug;

pub struct StreamDialectParser {
    dialect: StreamDialect,
    lines: LineBuffer,
    mapper: RecordMapper,
    /// Call ids in the order they were opened
    open_calls: Vec<String>,
    /// True until a TurnEnd has been emitted after the latest content
    needs_turn_end: bool,
}

impl StreamDialectParser {
    pub fn new(dialect: StreamDialect) -> Self {
        Self {
            dialect,
            lines: LineBuffer::new(),
            mapper: RecordMapper::for_dialect(dialect),
            open_calls: Vec::new(),
            needs_turn_end: true,
        }
    }

    pub fn dialect(&self) -> StreamDialect {
        self.dialect
    }

    /// Feed one chunk of the response body
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut raw = Vec::new();
        for line in self.lines.push(chunk) {
            self.decode_line(&line, &mut raw);
        }
        self.sequence(raw)
    }

    /// Called once at end of stream. Processes the residual carry, closes
    /// any still-open calls and guarantees the sequence ends with TurnEnd.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let mut raw = Vec::new();
        if let Some(line) = self.lines.finish() {
            self.decode_line(&line, &mut raw);
        }
        raw.push(StreamEvent::TurnEnd);
        self.sequence(raw)
    }

    fn decode_line(&mut self, line: &str, raw: &mut Vec<StreamEvent>) {
        let payload = match self.dialect.framing() {
            Framing::Sse => match line.strip_prefix("data:") {
                Some(rest) => rest.trim(),
                // event:, id:, retry:, comments and blank separators
                None => return,
            },
            Framing::Ndjson => line.trim(),
        };

        if payload.is_empty() {
            return;
        }

        if self.dialect.framing() == Framing::Sse && payload == "[DONE]" {
            self.mapper.done(raw);
            return;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(record) => self.mapper.map(&record, raw),
            Err(e) => debug!(dialect = %self.dialect, "Dropping malformed stream record: {}", e),
        }
    }

    fn sequence(&mut self, raw: Vec<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::with_capacity(raw.len());

        for event in raw {
            match event {
                StreamEvent::TextDelta(ref text) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.needs_turn_end = true;
                    out.push(event);
                }
                StreamEvent::ToolCallStart { ref call_id, .. } => {
                    if self.open_calls.contains(call_id) {
                        debug!(call_id = %call_id, "Duplicate tool call start ignored");
                        continue;
                    }
                    self.open_calls.push(call_id.clone());
                    self.needs_turn_end = true;
                    out.push(event);
                }
                StreamEvent::ToolCallArgDelta { ref call_id, .. } => {
                    if !self.open_calls.contains(call_id) {
                        debug!(call_id = %call_id, "Argument fragment for unknown call dropped");
                        continue;
                    }
                    out.push(event);
                }
                StreamEvent::ToolCallEnd { ref call_id } => {
                    let Some(pos) = self.open_calls.iter().position(|id| id == call_id) else {
                        debug!(call_id = %call_id, "End for unknown call dropped");
                        continue;
                    };
                    self.open_calls.remove(pos);
                    out.push(event);
                }
                StreamEvent::TurnEnd => {
                    for call_id in self.open_calls.drain(..) {
                        out.push(StreamEvent::ToolCallEnd { call_id });
                    }
                    if self.needs_turn_end {
                        self.needs_turn_end = false;
                        out.push(StreamEvent::TurnEnd);
                    }
                }
            }
        }

        out
    }
}
