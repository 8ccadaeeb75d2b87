// Pipeline progress events
// One PipelineProgress per event in the stream a run emits

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fretboard::TabEvent;

/// Number of working stages reported to callers
pub const TOTAL_STAGES: u8 = 6;

/// Highest overall percent the separation stage may report
pub const SEPARATION_PROGRESS_CEILING: u8 = 45;

/// Stages of one tab-generation run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Separating,
    Downloading,
    Transcribing,
    Extracting,
    Placing,
    Complete,
}

impl PipelineStage {
    /// 1-based stage number shown to callers
    pub fn number(self) -> u8 {
        match self {
            PipelineStage::Received => 1,
            PipelineStage::Separating => 2,
            PipelineStage::Downloading => 3,
            PipelineStage::Transcribing => 4,
            PipelineStage::Extracting => 5,
            PipelineStage::Placing | PipelineStage::Complete => TOTAL_STAGES,
        }
    }

    /// Overall percent reported when the stage starts
    pub fn entry_percent(self) -> u8 {
        match self {
            PipelineStage::Received => 2,
            PipelineStage::Separating => 5,
            PipelineStage::Downloading => 50,
            PipelineStage::Transcribing => 60,
            PipelineStage::Extracting => 80,
            PipelineStage::Placing => 90,
            PipelineStage::Complete => 100,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Separating => "separating",
            PipelineStage::Downloading => "downloading",
            PipelineStage::Transcribing => "transcribing",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Placing => "placing",
            PipelineStage::Complete => "complete",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single progress event
///
/// The last event of a run carries exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineProgress {
    pub stage: u8,
    pub total_stages: u8,
    pub message: String,

    /// Overall progress [0, 100]
    pub progress_percent: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<TabEvent>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineProgress {
    pub fn new(stage: PipelineStage, progress_percent: u8, message: String) -> Self {
        PipelineProgress {
            stage: stage.number(),
            total_stages: TOTAL_STAGES,
            message,
            progress_percent: progress_percent.min(100),
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Helper builder for creating progress events
pub struct ProgressBuilder {
    stage: PipelineStage,
}

impl ProgressBuilder {
    /// Start building an event for a stage
    pub fn stage(stage: PipelineStage) -> Self {
        ProgressBuilder { stage }
    }

    /// Stage entry event at the stage's entry percent
    pub fn start(self, message: impl Into<String>) -> PipelineProgress {
        PipelineProgress::new(self.stage, self.stage.entry_percent(), message.into())
    }

    /// Intermediate event at an explicit percent
    pub fn progress(self, percent: u8, message: impl Into<String>) -> PipelineProgress {
        PipelineProgress::new(self.stage, percent, message.into())
    }

    /// Terminal success event carrying the tab
    pub fn complete(self, message: impl Into<String>, result: Vec<TabEvent>) -> PipelineProgress {
        let mut event = PipelineProgress::new(self.stage, 100, message.into());
        event.result = Some(result);
        event
    }

    /// Terminal failure event
    pub fn failed(self, error: impl Into<String>) -> PipelineProgress {
        let error = error.into();
        let mut event = PipelineProgress::new(self.stage, 100, format!("Failed: {}", error));
        event.error = Some(error);
        event
    }
}

/// Map the separation service's own 0-100 progress into overall progress
pub fn scale_separator_progress(separator_percent: u8) -> u8 {
    let scaled = f64::from(separator_percent.min(100)) * 0.37 + 8.0;
    (scaled.round() as u8).min(SEPARATION_PROGRESS_CEILING)
}
