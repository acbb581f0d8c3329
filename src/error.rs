//! Error types shared by the analysis, classifier and queue modules.

use std::path::PathBuf;
use thiserror::Error;

/// Library error type
#[derive(Debug, Error)]
pub enum TretaError {
    /// Audio could not be turned into a feature vector (per track, recoverable)
    #[error("Feature extraction failed for {path}: {reason}")]
    FeatureExtraction { path: PathBuf, reason: String },

    /// Decoder has no support for the container or codec
    #[error("Unsupported audio format for {path}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// Training requested with fewer labelled samples than required
    #[error("Not enough training data: {found} labelled samples (need at least {required})")]
    InsufficientData { found: usize, required: usize },

    /// Model artifacts could not be written or read
    #[error("Model persistence failed at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Artifacts were readable but do not describe a usable model
    #[error("Invalid model artifacts: {0}")]
    ModelFormat(String),

    #[error("Unknown mood: {0}")]
    UnknownMood(String),

    #[error("Track {0} not found")]
    TrackNotFound(i64),

    #[error("Track store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TretaError {
    /// True for failures that only concern a single track. Batch analysis
    /// counts these and moves on; anything else aborts the batch.
    #[must_use]
    pub fn is_per_track(&self) -> bool {
        matches!(
            self,
            Self::FeatureExtraction { .. } | Self::UnsupportedFormat { .. } | Self::TrackNotFound(_)
        )
    }
}

pub type Result<T, E = TretaError> = std::result::Result<T, E>;
