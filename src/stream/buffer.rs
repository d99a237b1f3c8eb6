// Carry buffer for line-framed byte streams
//
// Splitting happens on raw bytes, so a multi-byte UTF-8 sequence cut by a
// chunk boundary stays in the carry until its line is complete.

#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the
    /// trailing `\n` or `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.carry.drain(..=newline_pos).collect();
            lines.push(decode_line(&line_bytes[..line_bytes.len() - 1]));
        }
        lines
    }

    /// Take whatever incomplete line is left at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        Some(decode_line(&rest))
    }

    pub fn is_empty(&self) -> bool {
        self.carry.is_empty()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
