// Test fixtures shared across modules

use async_trait::async_trait;
use axum::Router;
use std::path::{Path, PathBuf};

use crate::transcription::midi::tests::midi_bytes;
use crate::transcription::{Transcriber, TranscriptionError};

/// E major on the low strings, then an open high e
pub const E_MAJOR_THEN_HIGH_E: &[(u32, u32, u8)] =
    &[(0, 480, 40), (0, 480, 47), (0, 480, 52), (480, 960, 64)];

/// Write a short silent mono WAV file
pub fn write_wav(path: &Path) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..441 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Transcriber that writes a fixed MIDI file, or fails on request
pub struct FakeTranscriber {
    pub fail: bool,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &Path, output_dir: &Path) -> Result<PathBuf, TranscriptionError> {
        if self.fail {
            return Err(TranscriptionError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "model not found".to_string(),
            });
        }
        let path = output_dir.join("guitar_basic_pitch.mid");
        tokio::fs::write(&path, midi_bytes(480, E_MAJOR_THEN_HIGH_E)).await?;
        Ok(path)
    }
}

/// Serve `app` on an ephemeral local port and return its base URL
pub async fn spawn_app(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Decode every `data:` line of an event-stream body
pub fn data_lines<T: serde::de::DeserializeOwned>(body: &str) -> Vec<T> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|payload| serde_json::from_str(payload.trim()).unwrap())
        .collect()
}
