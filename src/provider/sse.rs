//! SSE decoding for streamed chat completions.
//!
//! Provides [`SseDecoder`], a line buffer that reassembles `data:` lines split
//! across TCP chunk boundaries and yields the parsed JSON payloads.

use serde_json::Value;

/// Maximum bytes buffered without seeing a newline before the buffer is dropped.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// A decoded SSE event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A `data:` line carrying a JSON payload.
    Data(Value),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `[DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk of bytes; returns the events completed by it, in order.
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line, &mut events);
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "SSE line exceeded buffer cap, discarding"
            );
            self.buffer.clear();
        }

        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut events);
        }
        events
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<SseEvent>) {
        let Ok(line) = std::str::from_utf8(raw) else {
            tracing::debug!("Skipping non-UTF-8 SSE line");
            return;
        };
        let line = line.trim_end_matches(['\r', '\n']);

        // event:, id:, retry: and comments carry nothing we relay
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();

        if data == "[DONE]" {
            self.done = true;
            events.push(SseEvent::Done);
            return;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(value) => events.push(SseEvent::Data(value)),
            Err(e) => tracing::debug!(error = %e, "Skipping malformed SSE data line"),
        }
    }
}
