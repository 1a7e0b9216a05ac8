//! Tracker configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Standard deviation model for one state component: `alpha * height + beta`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseCoefficients {
    pub alpha: f32,
    pub beta: f32,
}

impl NoiseCoefficients {
    /// Noise proportional to the box height.
    pub const fn scaled(alpha: f32) -> Self {
        Self { alpha, beta: 0.0 }
    }

    /// Noise independent of the box height.
    pub const fn fixed(beta: f32) -> Self {
        Self { alpha: 0.0, beta }
    }

    #[inline]
    pub fn std(&self, height: f32) -> f32 {
        self.alpha * height + self.beta
    }

    fn is_valid(&self) -> bool {
        self.alpha.is_finite()
            && self.beta.is_finite()
            && self.alpha >= 0.0
            && self.beta >= 0.0
            && (self.alpha > 0.0 || self.beta > 0.0)
    }
}

const STD_WEIGHT_POSITION: f32 = 1.0 / 20.0;
const STD_WEIGHT_VELOCITY: f32 = 1.0 / 160.0;

/// Noise profile of the constant-velocity Kalman filter.
///
/// State order is `(cx, cy, a, h, vcx, vcy, va, vh)`, measurement order is
/// `(cx, cy, a, h)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Initial state covariance of a new track
    pub initial: [NoiseCoefficients; 8],
    /// Process noise added on every predict
    pub process: [NoiseCoefficients; 8],
    /// Measurement noise
    pub measurement: [NoiseCoefficients; 4],
}

impl Default for KalmanConfig {
    fn default() -> Self {
        let pos = NoiseCoefficients::scaled(STD_WEIGHT_POSITION);
        let vel = NoiseCoefficients::scaled(STD_WEIGHT_VELOCITY);
        let init_pos = NoiseCoefficients::scaled(2.0 * STD_WEIGHT_POSITION);
        let init_vel = NoiseCoefficients::scaled(10.0 * STD_WEIGHT_VELOCITY);
        Self {
            initial: [
                init_pos,
                init_pos,
                NoiseCoefficients::fixed(1e-2),
                init_pos,
                init_vel,
                init_vel,
                NoiseCoefficients::fixed(1e-5),
                init_vel,
            ],
            process: [
                pos,
                pos,
                NoiseCoefficients::fixed(1e-2),
                pos,
                vel,
                vel,
                NoiseCoefficients::fixed(1e-5),
                vel,
            ],
            measurement: [pos, pos, NoiseCoefficients::fixed(1e-1), pos],
        }
    }
}

impl KalmanConfig {
    /// Multiplies every process and measurement coefficient by `factor`.
    ///
    /// Useful for per-class profiles, e.g. faces move less erratically than
    /// pedestrians.
    pub fn scaled(mut self, factor: f32) -> Self {
        for c in self.process.iter_mut().chain(self.measurement.iter_mut()) {
            c.alpha *= factor;
            c.beta *= factor;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let all = self
            .initial
            .iter()
            .chain(self.process.iter())
            .chain(self.measurement.iter());
        for c in all {
            if !c.is_valid() {
                return Err(TrackerError::config(
                    "kalman",
                    format!("noise coefficients must be finite, non-negative and not both zero, got {c:?}"),
                ));
            }
        }
        Ok(())
    }
}

/// Confidence level of the chi-square motion gate (4 degrees of freedom).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GateConfidence {
    P995,
    P99,
    P975,
    #[default]
    P95,
    P90,
}

impl GateConfidence {
    /// Inverse chi-square CDF with 4 degrees of freedom at this confidence.
    pub fn chi2_threshold(&self) -> f32 {
        match self {
            Self::P995 => 14.8603,
            Self::P99 => 13.2767,
            Self::P975 => 11.1433,
            Self::P95 => 9.4877,
            Self::P90 => 7.7794,
        }
    }
}

/// Solver used for each assignment sub-problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AssignmentSolver {
    /// Minimum total cost (Jonker-Volgenant)
    #[default]
    Optimal,
    /// Repeatedly take the cheapest remaining pair
    Greedy,
}

/// Configuration for [`DeepSortTracker`](crate::DeepSortTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Misses tolerated by a confirmed track before deletion
    pub max_age: u32,
    /// Consecutive hits required to confirm a track
    pub n_init: u32,
    /// IOU-stage gate on `1 - IOU`
    pub max_iou_distance: f32,
    /// Appearance gate on cosine distance
    pub max_cosine_distance: f32,
    /// Maximum embeddings kept per track
    pub feature_budget: usize,
    /// Store an embedding every N matches
    pub feature_update_interval: u32,
    /// Confirmed tracks missed more often than this skip the IOU stage
    pub max_iou_stage_misses: u32,
    /// Misses tolerated by a tentative track (0 deletes on the first miss)
    pub tentative_max_misses: u32,
    /// Frames a deleted confirmed track stays queryable
    pub inactive_grace_frames: u32,
    /// Use appearance embeddings in the cascade when detections carry them
    pub use_reid: bool,
    /// Fixed embedding length; learned from the first embedding when `None`
    pub embedding_dim: Option<usize>,
    pub gate_confidence: GateConfidence,
    pub solver: AssignmentSolver,
    pub kalman: KalmanConfig,
    /// Per-class Kalman profiles overriding `kalman`
    pub class_kalman: BTreeMap<i32, KalmanConfig>,
    /// Keep one id sequence per class instead of a shared one
    pub use_specific_counter: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 40,
            n_init: 3,
            max_iou_distance: 0.7,
            max_cosine_distance: 0.2,
            feature_budget: 100,
            feature_update_interval: 1,
            max_iou_stage_misses: 2,
            tentative_max_misses: 0,
            inactive_grace_frames: 30,
            use_reid: true,
            embedding_dim: None,
            gate_confidence: GateConfidence::default(),
            solver: AssignmentSolver::default(),
            kalman: KalmanConfig::default(),
            class_kalman: BTreeMap::new(),
            use_specific_counter: false,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_age == 0 {
            return Err(TrackerError::config("max_age", "must be at least 1"));
        }
        if self.n_init == 0 {
            return Err(TrackerError::config("n_init", "must be at least 1"));
        }
        if !(self.max_iou_distance > 0.0 && self.max_iou_distance <= 1.0) {
            return Err(TrackerError::config(
                "max_iou_distance",
                format!("must lie in (0, 1], got {}", self.max_iou_distance),
            ));
        }
        if !(self.max_cosine_distance > 0.0 && self.max_cosine_distance <= 2.0) {
            return Err(TrackerError::config(
                "max_cosine_distance",
                format!("must lie in (0, 2], got {}", self.max_cosine_distance),
            ));
        }
        if self.feature_budget == 0 {
            return Err(TrackerError::config("feature_budget", "must be at least 1"));
        }
        if self.feature_update_interval == 0 {
            return Err(TrackerError::config(
                "feature_update_interval",
                "must be at least 1",
            ));
        }
        if self.embedding_dim == Some(0) {
            return Err(TrackerError::config("embedding_dim", "must be non-zero"));
        }
        self.kalman.validate()?;
        for profile in self.class_kalman.values() {
            profile.validate()?;
        }
        Ok(())
    }

    pub fn chi2_threshold(&self) -> f32 {
        self.gate_confidence.chi2_threshold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TrackerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_max_age() {
        let config = TrackerConfig {
            max_age: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(TrackerError::InvalidConfig { field, .. }) => assert_eq!(field, "max_age"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_degenerate_noise() {
        let mut kalman = KalmanConfig::default();
        kalman.measurement[2] = NoiseCoefficients::fixed(0.0);
        let config = TrackerConfig {
            kalman,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scaled_class_profile() {
        let mut config = TrackerConfig::default();
        config
            .class_kalman
            .insert(1, KalmanConfig::default().scaled(0.5));
        assert!(config.validate().is_ok());
        let face = &config.class_kalman[&1];
        assert!((face.process[0].alpha - STD_WEIGHT_POSITION * 0.5).abs() < 1e-9);
        // initial covariance is untouched by scaling
        assert_eq!(face.initial, config.kalman.initial);
    }

    #[test]
    fn test_partial_json() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{ "max_age": 5, "solver": "Greedy" }"#).unwrap();
        assert_eq!(config.max_age, 5);
        assert_eq!(config.solver, AssignmentSolver::Greedy);
        assert_eq!(config.n_init, 3);
    }
}
