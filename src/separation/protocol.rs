// Separation service wire protocol
// Server-sent events whose data lines are JSON SeparationEvent objects

use serde::{Deserialize, Serialize};

/// One event streamed by `POST /separate`
///
/// Progress events carry `message` and `progress`; the last event carries
/// either `file_id` (success) or `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparationEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SeparationEvent {
    pub fn progress(message: impl Into<String>, progress: u8) -> Self {
        SeparationEvent {
            message: Some(message.into()),
            progress: Some(progress.min(100)),
            ..Default::default()
        }
    }

    pub fn complete(file_id: impl Into<String>) -> Self {
        SeparationEvent {
            message: Some("Separation complete!".to_string()),
            progress: Some(100),
            file_id: Some(file_id.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        SeparationEvent {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.file_id.is_some() || self.error.is_some()
    }
}

/// Incremental decoder for a `text/event-stream` body
///
/// Feed raw chunks as they arrive; complete `data:` lines are decoded into
/// events. Comments, other fields and blank separators are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        SseDecoder { buffer: Vec::new() }
    }

    /// Append a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SeparationEvent, serde_json::Error>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = parse_data_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<Result<SeparationEvent, serde_json::Error>> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        parse_data_line(line.trim_end_matches(['\r', '\n']))
    }
}

/// Decode a single SSE line, returning `None` for non-data lines
pub fn parse_data_line(line: &str) -> Option<Result<SeparationEvent, serde_json::Error>> {
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    Some(serde_json::from_str(payload))
}
