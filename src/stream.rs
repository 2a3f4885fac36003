//! Streaming response decoder.
//!
//! The backend frames its body as newline-terminated records; only records
//! starting with `data: ` carry payload, encoded as a JSON object with a
//! `content` delta. The transport hands us arbitrary byte chunks that can
//! split a record (or a multi-byte character) anywhere, so the decoder
//! buffers raw bytes and only parses complete newline-terminated records.
//! It is deliberately independent of the transport so it can be unit-tested
//! with synthetic chunks.

/// Literal payload that ends the logical stream early. Ignored as a no-op.
const DONE_MARKER: &str = "[DONE]";

/// Prefix marking a record that carries payload.
const DATA_PREFIX: &str = "data: ";

/// One decoder instance per response; not restartable.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns the text deltas parsed from the
    /// complete records it finished, in arrival order. Trailing partial data
    /// stays buffered for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut deltas = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let record: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(delta) = parse_record(&record) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// The source signaled completion: parse whatever is still buffered as
    /// final (possibly unterminated) records.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        rest.split(|&b| b == b'\n')
            .filter_map(parse_record)
            .collect()
    }
}

/// Parse one raw record into a text delta. Returns `None` for records with
/// no payload: non-`data:` lines, the `[DONE]` marker, and malformed JSON
/// (logged, never surfaced — the stream continues).
fn parse_record(record: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(record);
    let data = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if data == DONE_MARKER {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => Some(
            value
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or("")
                .to_string(),
        ),
        Err(err) => {
            tracing::warn!("Skipping malformed stream record: {err} (data: {data})");
            None
        }
    }
}
