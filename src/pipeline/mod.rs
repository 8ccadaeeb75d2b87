// Pipeline execution module
// Orchestrates the full audio-to-tablature pipeline

pub mod artifacts;
pub mod error;
pub mod orchestrator;
pub mod progress;

pub use artifacts::{sanitized_extension, ArtifactTracker};
pub use error::PipelineError;
pub use orchestrator::{validate_upload, PipelineOrchestrator, DEFAULT_HEARTBEAT_INTERVAL};
pub use progress::{
    scale_separator_progress, PipelineProgress, PipelineStage, ProgressBuilder,
    SEPARATION_PROGRESS_CEILING, TOTAL_STAGES,
};
