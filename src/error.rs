//! Error types for the tracker.

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors surfaced by the tracker.
///
/// Per-detection anomalies (malformed boxes, non-finite scores) never show up
/// here: they are discarded with a warning and the frame proceeds.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A configuration value is out of range.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A detection carries an embedding whose length differs from the session's.
    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    EmbeddingDimension { expected: usize, found: usize },

    /// Could not reserve room for the tracks spawned this frame.
    #[error("failed to allocate new tracks: {0}")]
    Capacity(#[from] TryReserveError),

    /// The track id counter overflowed.
    #[error("track id space exhausted")]
    IdSpaceExhausted,
}

impl TrackerError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
