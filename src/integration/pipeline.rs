//! TrackerPipeline for combining detection with tracking.

use thiserror::Error;

use crate::error::TrackerError;
use crate::tracker::{DeepSortTracker, TrackedObject, TrackerConfig};

use super::DetectionSource;

/// Failure of one pipeline frame.
#[derive(Debug, Error)]
pub enum PipelineError<E> {
    /// The detector could not produce detections.
    #[error("detection failed: {0}")]
    Detector(E),

    /// The tracker rejected the frame.
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// A combined tracker that bundles detection inference with DeepSORT.
///
/// Any `DetectionSource` works; sources that attach embeddings to their
/// detections get appearance matching for free.
pub struct TrackerPipeline<D: DetectionSource> {
    detector: D,
    tracker: DeepSortTracker,
}

impl<D: DetectionSource> TrackerPipeline<D> {
    /// Create a new tracking pipeline with the given detector and tracker config.
    pub fn new(detector: D, config: TrackerConfig) -> Result<Self, TrackerError> {
        Ok(Self {
            detector,
            tracker: DeepSortTracker::new(config)?,
        })
    }

    /// Create a new tracking pipeline with default tracker configuration.
    pub fn with_default_config(detector: D) -> Result<Self, TrackerError> {
        Self::new(detector, TrackerConfig::default())
    }

    /// Runs detection on one image and feeds the result to the tracker.
    ///
    /// # Arguments
    /// * `input` - Raw image bytes
    /// * `width` - Image width in pixels
    /// * `height` - Image height in pixels
    pub fn process_frame(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<TrackedObject>, PipelineError<D::Error>> {
        let detections = self
            .detector
            .detect(input, width, height)
            .map_err(PipelineError::Detector)?;
        Ok(self.tracker.track(detections)?)
    }

    /// Get a reference to the underlying detector.
    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Get a mutable reference to the underlying detector.
    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Get a reference to the underlying tracker.
    pub fn tracker(&self) -> &DeepSortTracker {
        &self.tracker
    }

    /// Get a mutable reference to the underlying tracker.
    pub fn tracker_mut(&mut self) -> &mut DeepSortTracker {
        &mut self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{Detection, TrackState};

    struct MockDetector {
        detections: Vec<Detection>,
    }

    impl DetectionSource for MockDetector {
        type Error = std::convert::Infallible;

        fn detect(
            &mut self,
            _input: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<Detection>, Self::Error> {
            Ok(self.detections.clone())
        }
    }

    struct FailingDetector;

    impl DetectionSource for FailingDetector {
        type Error = String;

        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<Detection>, Self::Error> {
            Err("camera unplugged".into())
        }
    }

    #[test]
    fn test_tracker_pipeline() {
        let detector = MockDetector {
            detections: vec![Detection::new(10.0, 20.0, 50.0, 80.0, 0.9, 0)],
        };

        let mut pipeline = TrackerPipeline::with_default_config(detector).unwrap();
        let mut tracks = Vec::new();
        for _ in 0..3 {
            tracks = pipeline.process_frame(&[], 640, 480).unwrap();
        }

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id, 1);
        assert_eq!(tracks[0].state, TrackState::Confirmed);
        assert_eq!(pipeline.tracker().frame_id(), 3);
    }

    #[test]
    fn test_detector_error_is_wrapped() {
        let mut pipeline = TrackerPipeline::with_default_config(FailingDetector).unwrap();
        let err = pipeline.process_frame(&[], 640, 480).unwrap_err();
        assert!(matches!(err, PipelineError::Detector(_)));
        assert_eq!(err.to_string(), "detection failed: camera unplugged");
        assert_eq!(pipeline.tracker().frame_id(), 0);
    }
}
