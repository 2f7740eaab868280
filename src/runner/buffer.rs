//! Newline framing for chunked pipe output.

/// Accumulates raw chunks and yields complete lines.
///
/// Splits on `\n` only, so multi-byte characters cut across chunks are reassembled before decoding. A trailing `\r` is
/// dropped from each line. Invalid UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(decode(&std::mem::take(&mut self.pending)));
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Flush an unterminated final line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(decode(&std::mem::take(&mut self.pending)))
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
