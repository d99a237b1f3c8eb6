// Backend stream decoding
//
// Turns the chunked body of a streaming model response into StreamEvents.
// Three wire dialects are supported: Anthropic SSE, OpenAI-compatible SSE
// and Ollama NDJSON.

mod buffer;
mod dialects;
mod events;
mod parser;

pub use buffer::LineBuffer;
pub use events::{Framing, StreamDialect, StreamEvent};
pub use parser::StreamDialectParser;
