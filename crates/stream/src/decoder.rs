use snafu::ResultExt;

use super::chunk::StreamChunk;
use super::error::{DecodeSnafu, TransportResult, Utf8Snafu};

const DONE_SENTINEL: &str = "[DONE]";

/// Incremental decoder for chunk frames arriving over HTTP.
///
/// Accepts Server-Sent Events (`data: {...}` lines, frame ends at a blank line) and plain
/// newline-delimited JSON. Bytes may be split anywhere across `push` calls.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<TransportResult<StreamChunk>> {
        self.pending.extend_from_slice(bytes);

        let mut decoded = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline).collect::<Vec<_>>();
            line.pop();
            self.process_bytes(line, &mut decoded);
        }
        decoded
    }

    /// Flushes a trailing line or frame left without its terminator when the body ended.
    pub fn finish(&mut self) -> Vec<TransportResult<StreamChunk>> {
        let mut decoded = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.process_bytes(line, &mut decoded);
        }
        self.flush_frame(&mut decoded);
        decoded
    }

    /// Lines are split on raw bytes, so a multi-byte character never straddles two lines.
    fn process_bytes(&mut self, line: Vec<u8>, decoded: &mut Vec<TransportResult<StreamChunk>>) {
        match String::from_utf8(line).context(Utf8Snafu {
            stage: "decode-stream-line",
        }) {
            Ok(line) => self.process_line(&line, decoded),
            Err(error) => {
                tracing::warn!(error = %error, "dropping undecodable stream line");
                decoded.push(Err(error));
            }
        }
    }

    fn process_line(&mut self, line: &str, decoded: &mut Vec<TransportResult<StreamChunk>>) {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            self.flush_frame(decoded);
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(data) = line.strip_prefix("data:") {
            self.data_lines
                .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            return;
        }

        if line.trim_start().starts_with('{') {
            self.flush_frame(decoded);
            Self::decode_payload(line, decoded);
            return;
        }

        // `event:`, `id:` and `retry:` fields carry nothing the chunk protocol needs.
        tracing::trace!(line, "ignoring non-data stream field");
    }

    fn flush_frame(&mut self, decoded: &mut Vec<TransportResult<StreamChunk>>) {
        if self.data_lines.is_empty() {
            return;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Self::decode_payload(&payload, decoded);
    }

    fn decode_payload(payload: &str, decoded: &mut Vec<TransportResult<StreamChunk>>) {
        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return;
        }

        decoded.push(
            serde_json::from_str::<StreamChunk>(payload).context(DecodeSnafu {
                stage: "decode-stream-frame",
                payload: payload.to_string(),
            }),
        );
    }
}
