// Pipeline error taxonomy
// Every stage failure is mapped to one of these before it reaches the caller

use thiserror::Error;

use crate::separation::SeparationError;
use crate::transcription::{QuantizeError, TranscriptionError};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or empty upload; rejected before any work starts
    #[error("{0}")]
    Validation(String),

    /// A collaborator could not be reached at all
    #[error("Separation service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A collaborator answered with an explicit error; message kept verbatim
    #[error("{0}")]
    UpstreamRejected(String),

    /// A collaborator finished without producing a usable result
    #[error("No output: {0}")]
    NoOutput(String),

    /// A local stage failed
    #[error("{0}")]
    Processing(String),

    /// The caller went away; cleanup runs but nothing is reported
    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn no_file() -> Self {
        PipelineError::Validation("No file part".to_string())
    }

    pub fn no_selected_file() -> Self {
        PipelineError::Validation("No selected file".to_string())
    }

    pub fn empty_file() -> Self {
        PipelineError::Validation("Uploaded file is empty".to_string())
    }
}

impl From<SeparationError> for PipelineError {
    fn from(error: SeparationError) -> Self {
        match error {
            SeparationError::Unavailable(message) => PipelineError::UpstreamUnavailable(message),
            SeparationError::Rejected(message) => PipelineError::UpstreamRejected(message),
            SeparationError::NoOutput(message) => PipelineError::NoOutput(message),
            SeparationError::Io(e) => PipelineError::Io(e),
        }
    }
}

impl From<TranscriptionError> for PipelineError {
    fn from(error: TranscriptionError) -> Self {
        PipelineError::Processing(format!("Transcription failed: {}", error))
    }
}

impl From<QuantizeError> for PipelineError {
    fn from(error: QuantizeError) -> Self {
        PipelineError::Processing(format!("Note extraction failed: {}", error))
    }
}
