// Audio-to-MIDI transcription
// Drives the basic-pitch command line tool on a separated guitar track

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Failed to start transcriber '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Transcriber exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Transcriber produced no MIDI at {0}")]
    MissingOutput(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Converts an audio file into a MIDI-like note stream on disk
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio` into a MIDI file inside `output_dir`, returning its path
    async fn transcribe(&self, audio: &Path, output_dir: &Path)
        -> Result<PathBuf, TranscriptionError>;
}

/// Note-detection thresholds passed to basic-pitch
#[derive(Debug, Clone, Copy)]
pub struct TranscriberThresholds {
    pub onset: f32,
    pub frame: f32,
}

impl Default for TranscriberThresholds {
    fn default() -> Self {
        TranscriberThresholds {
            onset: 0.6,
            frame: 0.4,
        }
    }
}

/// Transcriber backed by the `basic-pitch` CLI
#[derive(Debug, Clone)]
pub struct BasicPitchTranscriber {
    program: String,
    thresholds: TranscriberThresholds,
}

impl BasicPitchTranscriber {
    pub fn new(program: impl Into<String>) -> Self {
        BasicPitchTranscriber {
            program: program.into(),
            thresholds: TranscriberThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: TranscriberThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Path basic-pitch writes for a given input
    pub fn output_path(audio: &Path, output_dir: &Path) -> PathBuf {
        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        output_dir.join(format!("{}_basic_pitch.mid", stem))
    }
}

#[async_trait]
impl Transcriber for BasicPitchTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, TranscriptionError> {
        tokio::fs::create_dir_all(output_dir).await?;

        log::info!("Transcribing {} with {}", audio.display(), self.program);
        let output = Command::new(&self.program)
            .arg(output_dir)
            .arg(audio)
            .arg("--onset-threshold")
            .arg(self.thresholds.onset.to_string())
            .arg("--frame-threshold")
            .arg(self.thresholds.frame.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TranscriptionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TranscriptionError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let midi_path = Self::output_path(audio, output_dir);
        if !tokio::fs::try_exists(&midi_path).await? {
            return Err(TranscriptionError::MissingOutput(midi_path));
        }

        Ok(midi_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_path_follows_input_stem() {
        let path = BasicPitchTranscriber::output_path(
            Path::new("/work/run/guitar.wav"),
            Path::new("/work/run/midi"),
        );
        assert_eq!(path, PathBuf::from("/work/run/midi/guitar_basic_pitch.mid"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let temp_dir = TempDir::new().unwrap();
        let transcriber = BasicPitchTranscriber::new("tabforge-no-such-transcriber");

        let result = transcriber
            .transcribe(&temp_dir.path().join("guitar.wav"), temp_dir.path())
            .await;

        assert!(matches!(result, Err(TranscriptionError::Spawn { .. })));
    }
}
