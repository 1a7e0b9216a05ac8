//! Single object track.

use ndarray::{Array1, Array2};

use crate::tracker::config::TrackerConfig;
use crate::tracker::detection::{Detection, TrackedObject};
use crate::tracker::gallery::FeatureGallery;
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Lifecycle thresholds copied into each track at creation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lifecycle {
    pub n_init: u32,
    pub max_age: u32,
    pub tentative_max_misses: u32,
}

impl From<&TrackerConfig> for Lifecycle {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            n_init: config.n_init,
            max_age: config.max_age,
            tentative_max_misses: config.tentative_max_misses,
        }
    }
}

/// A single target with Kalman state `(cx, cy, a, h)` plus velocities.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u64,
    pub state: TrackState,
    pub class_id: i32,
    /// Score of the last associated detection
    pub score: f32,
    /// Consecutive matches since creation
    pub hits: u32,
    /// Frames since creation
    pub age: u32,
    pub time_since_update: u32,
    pub mean: Array1<f32>,
    pub covariance: Array2<f32>,
    /// Last associated detection box (unfiltered)
    pub last_bbox: Rect,
    pub gallery: FeatureGallery,
    lifecycle: Lifecycle,
}

impl Track {
    pub(crate) fn new(
        track_id: u64,
        detection: &Detection,
        kalman_filter: &KalmanFilter,
        config: &TrackerConfig,
    ) -> Self {
        let bbox = detection.bbox();
        let (mean, covariance) = kalman_filter.initiate(bbox.to_xyah());
        let mut gallery = FeatureGallery::new(config.feature_budget, config.feature_update_interval);
        if let Some(embedding) = detection.embedding() {
            gallery.offer(embedding);
        }

        let lifecycle = Lifecycle::from(config);
        let state = if lifecycle.n_init <= 1 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };

        Self {
            track_id,
            state,
            class_id: detection.class_id(),
            score: detection.score(),
            hits: 1,
            age: 1,
            time_since_update: 0,
            mean,
            covariance,
            last_bbox: bbox,
            gallery,
            lifecycle,
        }
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    /// Current Kalman-filtered box.
    pub fn rect(&self) -> Rect {
        Rect::from_xyah(self.mean[0], self.mean[1], self.mean[2], self.mean[3])
    }

    pub fn is_tentative(&self) -> bool {
        self.state == TrackState::Tentative
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn is_deleted(&self) -> bool {
        self.state == TrackState::Deleted
    }

    /// Propagates the state one frame forward.
    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        (self.mean, self.covariance) = kalman_filter.predict(&self.mean, &self.covariance);
        self.age += 1;
    }

    /// Applies an associated detection.
    pub fn update(&mut self, detection: &Detection, kalman_filter: &KalmanFilter) {
        let bbox = detection.bbox();
        (self.mean, self.covariance) =
            kalman_filter.update(&self.mean, &self.covariance, bbox.to_xyah());

        if let Some(embedding) = detection.embedding() {
            self.gallery.offer(embedding);
        }

        self.last_bbox = bbox;
        self.score = detection.score();
        self.hits += 1;
        self.time_since_update = 0;

        if self.is_tentative() && self.hits >= self.lifecycle.n_init {
            self.state = TrackState::Confirmed;
        }
    }

    /// Records a frame without association and applies the deletion rules.
    pub fn mark_missed(&mut self) {
        self.time_since_update += 1;
        let limit = match self.state {
            TrackState::Tentative => self.lifecycle.tentative_max_misses,
            TrackState::Confirmed => self.lifecycle.max_age,
            TrackState::Deleted => return,
        };
        if self.time_since_update > limit {
            self.state = TrackState::Deleted;
        }
    }

    pub fn to_object(&self) -> TrackedObject {
        TrackedObject {
            track_id: self.track_id,
            bbox: self.rect(),
            class_id: self.class_id,
            score: self.score,
            state: self.state,
            age: self.age,
            hits: self.hits,
            time_since_update: self.time_since_update,
        }
    }
}
