//! Progress event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stages in execution order, plus the error terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Loading,
    Labeling,
    Splitting,
    Training,
    Classifying,
    Saving,
    Tiles,
    Complete,
    Error,
}

impl Stage {
    /// Successful path through the pipeline
    pub const ORDER: [Stage; 8] = [
        Stage::Loading,
        Stage::Labeling,
        Stage::Splitting,
        Stage::Training,
        Stage::Classifying,
        Stage::Saving,
        Stage::Tiles,
        Stage::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::Labeling => "labeling",
            Stage::Splitting => "splitting",
            Stage::Training => "training",
            Stage::Classifying => "classifying",
            Stage::Saving => "saving",
            Stage::Tiles => "tiles",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One progress update for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: String,
    pub stage: Stage,
    /// Percent complete within `stage`, 0..=100
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(session_id: impl Into<String>, stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            stage,
            progress: progress.min(100),
            message: message.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}
