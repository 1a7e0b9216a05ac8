//! DeepSORT multi-object tracking.
//!
//! Detections produced by an external detector (boxes, class ids and optional
//! re-identification embeddings) are associated across frames into tracks with
//! stable identifiers. See [`DeepSortTracker`] for the per-frame entry point.

pub mod error;
pub mod integration;
pub mod tracker;

pub use error::{Result, TrackerError};
pub use integration::{
    DetectionBuilder, DetectionSource, IntoDetections, PipelineError, TrackerPipeline,
};
pub use tracker::{
    AssignmentSolver, BoxDetection, DeepSortTracker, Detection, FusionConfig, FusionLayer,
    FusionLink, GateConfidence, InactiveTrack, KalmanConfig, NoiseCoefficients, Rect,
    SharedTracker, TrackState, TrackedObject, TrackerConfig,
};
