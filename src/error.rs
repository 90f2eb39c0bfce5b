//! Error and warning types shared by the whole pipeline.
use crate::split::Split;
use std::fmt;
use thiserror::Error;

/// Errors raised while configuring, training or evaluating a classifier.
#[derive(Debug, Error)]
pub enum LabError {
    /// Rejected before any computation starts.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Numerical divergence, shape mismatch or network construction problem.
    #[error("training failed: {0}")]
    TrainingFailure(String),

    #[error("a training run is already in progress on this trainer")]
    RunInProgress,

    #[error("training cancelled after {epochs_completed} epoch(s)")]
    Cancelled { epochs_completed: usize },

    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Result alias for lab operations
pub type Result<T> = std::result::Result<T, LabError>;

/// Non-fatal conditions the UI should surface but that never fail a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabWarning {
    /// A validation or test split ended up with no samples; the matching
    /// metrics or evaluation fields will be `None`.
    EmptySplit(Split),
}

impl fmt::Display for LabWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabWarning::EmptySplit(split) => write!(f, "{split} split is empty"),
        }
    }
}
