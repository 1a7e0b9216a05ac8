//! Boundary with external detection backends.
//!
//! Inference itself lives outside this crate; detectors plug in through
//! [`DetectionSource`] and hand over boxes, class ids and optional
//! re-identification embeddings.

mod builder;
mod detector;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectionSource, IntoDetections};
pub use pipeline::{PipelineError, TrackerPipeline};
