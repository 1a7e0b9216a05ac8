mod config;
mod cost_matrix;
mod deep_sort;
mod detection;
mod fusion;
mod gallery;
mod id_allocator;
mod kalman_filter;
mod matching;
mod rect;
mod shared;
mod track;
mod track_state;

pub use config::{AssignmentSolver, GateConfidence, KalmanConfig, NoiseCoefficients, TrackerConfig};
pub use cost_matrix::{CostMatrixBuilder, CostMetric, INFEASIBLE_COST};
pub use deep_sort::{DeepSortTracker, InactiveTrack};
pub use detection::{BoxDetection, Detection, TrackedObject};
pub use fusion::{FusionConfig, FusionLayer, FusionLink};
pub use gallery::FeatureGallery;
pub use id_allocator::IdAllocator;
pub use kalman_filter::{FilterBank, KalmanFilter};
pub use matching::{
    AssignmentResult, MatchResult, MatchStage, TieBreak, linear_assignment, matching_cascade,
    min_cost_matching,
};
pub use rect::{Rect, iou_batch};
pub use shared::SharedTracker;
pub use track::Track;
pub use track_state::TrackState;
