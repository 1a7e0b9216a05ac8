//! Constant-velocity Kalman filter over `(cx, cy, a, h)` boxes.
//!
//! Matrices are kept in ndarray; the small dense factorisations (Cholesky of
//! the 4x4 innovation covariance and the 8x8 state covariance check) go through
//! nalgebra to stay free of BLAS/LAPACK.

use std::collections::BTreeMap;

use nalgebra::{Cholesky, DMatrix, Matrix4, U4, Vector4};
use ndarray::{Array1, Array2};
use tracing::warn;

use crate::tracker::config::{KalmanConfig, NoiseCoefficients, TrackerConfig};

const NDIM: usize = 4;
const STATE_DIM: usize = 2 * NDIM;

/// Variance written into a diagonal entry that lost positivity.
const REPAIR_VARIANCE: f32 = 1e-6;
const MAX_REGULARISATION_STEPS: usize = 8;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f32>,
    update_mat: Array2<f32>,
    noise: KalmanConfig,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new(KalmanConfig::default())
    }
}

impl KalmanFilter {
    pub fn new(noise: KalmanConfig) -> Self {
        let mut motion_mat = Array2::eye(STATE_DIM);
        for i in 0..NDIM {
            motion_mat[[i, NDIM + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((NDIM, STATE_DIM));
        for i in 0..NDIM {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            noise,
        }
    }

    /// Creates a track state from an unassociated measurement `(cx, cy, a, h)`.
    /// Velocities start at zero; uncertainty scales with the box height.
    pub fn initiate(&self, measurement: [f32; 4]) -> (Array1<f32>, Array2<f32>) {
        let mut mean = Array1::zeros(STATE_DIM);
        for i in 0..NDIM {
            mean[i] = measurement[i];
        }
        let covariance = diag_from_std(&self.noise.initial, measurement[3]);
        (mean, covariance)
    }

    pub fn predict(
        &self,
        mean: &Array1<f32>,
        covariance: &Array2<f32>,
    ) -> (Array1<f32>, Array2<f32>) {
        let motion_cov = diag_from_std(&self.noise.process, mean[3]);

        let new_mean = self.motion_mat.dot(mean);
        let mut new_covariance =
            self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;
        condition_covariance(&mut new_covariance);

        (new_mean, new_covariance)
    }

    /// Projects the state into measurement space, adding measurement noise.
    pub fn project(
        &self,
        mean: &Array1<f32>,
        covariance: &Array2<f32>,
    ) -> (Array1<f32>, Array2<f32>) {
        let innovation_cov = diag_from_std(&self.noise.measurement, mean[3]);

        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + innovation_cov;

        (mean_proj, covariance_proj)
    }

    pub fn update(
        &self,
        mean: &Array1<f32>,
        covariance: &Array2<f32>,
        measurement: [f32; 4],
    ) -> (Array1<f32>, Array2<f32>) {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P H^T S^-1, with S factorised once.
        let s_inv = to_ndarray4(&cholesky_regularised(&projected_cov).inverse());
        let pht = covariance.dot(&self.update_mat.t());
        let kalman_gain = pht.dot(&s_inv);

        let new_mean = mean + &kalman_gain.dot(&innovation);
        let mut new_covariance =
            covariance - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());
        condition_covariance(&mut new_covariance);

        (new_mean, new_covariance)
    }

    /// Squared Mahalanobis distance between the projected state and each
    /// measurement `(cx, cy, a, h)`.
    pub fn gating_distance(
        &self,
        mean: &Array1<f32>,
        covariance: &Array2<f32>,
        measurements: &[[f32; 4]],
    ) -> Vec<f32> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let chol = cholesky_regularised(&projected_cov);
        let mu = Vector4::from_fn(|i, _| projected_mean[i]);

        measurements
            .iter()
            .map(|z| {
                let d = Vector4::from_column_slice(z) - mu;
                d.dot(&chol.solve(&d)).max(0.0)
            })
            .collect()
    }
}

/// One filter per configured class profile plus the default filter.
#[derive(Debug, Clone, Default)]
pub struct FilterBank {
    default: KalmanFilter,
    per_class: BTreeMap<i32, KalmanFilter>,
}

impl FilterBank {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            default: KalmanFilter::new(config.kalman.clone()),
            per_class: config
                .class_kalman
                .iter()
                .map(|(&class_id, noise)| (class_id, KalmanFilter::new(noise.clone())))
                .collect(),
        }
    }

    pub fn for_class(&self, class_id: i32) -> &KalmanFilter {
        self.per_class.get(&class_id).unwrap_or(&self.default)
    }
}

fn diag_from_std(coefficients: &[NoiseCoefficients], height: f32) -> Array2<f32> {
    let mut cov = Array2::zeros((coefficients.len(), coefficients.len()));
    for (i, c) in coefficients.iter().enumerate() {
        let std = c.std(height);
        cov[[i, i]] = std * std;
    }
    cov
}

fn to_ndarray4(m: &Matrix4<f32>) -> Array2<f32> {
    Array2::from_shape_fn((NDIM, NDIM), |(i, j)| m[(i, j)])
}

/// Cholesky factor of a 4x4 covariance. Matrices that drifted away from
/// positive definiteness get growing diagonal jitter until the factorisation
/// succeeds.
fn cholesky_regularised(m: &Array2<f32>) -> Cholesky<f32, U4> {
    let mut nm = Matrix4::from_fn(|i, j| 0.5 * (m[[i, j]] + m[[j, i]]));
    let scale = (nm.trace().abs() / NDIM as f32).max(1.0);
    let mut jitter = 1e-6 * scale;

    for _ in 0..MAX_REGULARISATION_STEPS {
        if let Some(chol) = Cholesky::new(nm) {
            return chol;
        }
        warn!(jitter, "innovation covariance not positive definite, regularising");
        nm += Matrix4::identity() * jitter;
        jitter *= 10.0;
    }

    diagonal_factor(&nm)
}

/// Cholesky factor of the diagonal of `m`, with each variance clamped to stay
/// positive.
fn diagonal_factor(m: &Matrix4<f32>) -> Cholesky<f32, U4> {
    let l = Matrix4::from_diagonal(&m.diagonal().map(|v| v.abs().max(REPAIR_VARIANCE).sqrt()));
    Cholesky::new_unchecked(l)
}

/// Symmetrises the covariance in place and repairs it when it is no longer
/// positive definite. Returns `true` when a repair was needed.
pub(crate) fn condition_covariance(cov: &mut Array2<f32>) -> bool {
    let n = cov.nrows();
    let mut repaired = false;

    for i in 0..n {
        for j in (i + 1)..n {
            let mut v = 0.5 * (cov[[i, j]] + cov[[j, i]]);
            if !v.is_finite() {
                v = 0.0;
                repaired = true;
            }
            cov[[i, j]] = v;
            cov[[j, i]] = v;
        }
        let d = cov[[i, i]];
        if !(d.is_finite() && d > 0.0) {
            cov[[i, i]] = REPAIR_VARIANCE;
            repaired = true;
        }
    }

    let mut jitter = REPAIR_VARIANCE;
    for _ in 0..MAX_REGULARISATION_STEPS {
        let dm = DMatrix::from_fn(n, n, |i, j| cov[[i, j]]);
        if dm.cholesky().is_some() {
            if repaired {
                warn!("state covariance lost positive definiteness, re-inflated");
            }
            return repaired;
        }
        repaired = true;
        for i in 0..n {
            cov[[i, i]] += jitter;
        }
        jitter *= 10.0;
    }

    // Give up on the correlations and keep the variances.
    warn!("state covariance reset to its diagonal");
    for i in 0..n {
        for j in 0..n {
            if i != j {
                cov[[i, j]] = 0.0;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn is_positive_definite(cov: &Array2<f32>) -> bool {
        let n = cov.nrows();
        let symmetric = (0..n).all(|i| (0..n).all(|j| cov[[i, j]] == cov[[j, i]]));
        symmetric && DMatrix::from_fn(n, n, |i, j| cov[[i, j]]).cholesky().is_some()
    }

    #[test]
    fn test_initiate() {
        let kf = KalmanFilter::default();
        let (mean, cov) = kf.initiate([100.0, 200.0, 0.5, 50.0]);
        assert_eq!(mean[0], 100.0);
        assert_eq!(mean[3], 50.0);
        assert_eq!(mean[4], 0.0);
        // 2 * (1/20) * 50 = 5
        assert_abs_diff_eq!(cov[[0, 0]], 25.0, epsilon = 1e-4);
        assert!(is_positive_definite(&cov));
    }

    #[test]
    fn test_predict_moves_with_velocity() {
        let kf = KalmanFilter::default();
        let (mut mean, cov) = kf.initiate([10.0, 10.0, 1.0, 40.0]);
        mean[4] = 2.0;
        let (predicted, predicted_cov) = kf.predict(&mean, &cov);
        assert_abs_diff_eq!(predicted[0], 12.0, epsilon = 1e-5);
        assert!(predicted_cov[[0, 0]] > cov[[0, 0]]);
    }

    #[test]
    fn test_round_trip_same_measurement() {
        let kf = KalmanFilter::default();
        let z = [30.0, 30.0, 1.0, 40.0];
        let (mean, cov) = kf.initiate(z);
        let (mean, cov) = kf.predict(&mean, &cov);
        let (mean, _) = kf.update(&mean, &cov, z);
        for i in 0..4 {
            assert_abs_diff_eq!(mean[i], z[i], epsilon = 1e-4);
        }
        for i in 4..8 {
            assert_abs_diff_eq!(mean[i], 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_covariance_stays_positive_definite() {
        let kf = KalmanFilter::default();
        let (mut mean, mut cov) = kf.initiate([100.0, 100.0, 0.5, 80.0]);
        for step in 0..200 {
            (mean, cov) = kf.predict(&mean, &cov);
            assert!(is_positive_definite(&cov), "after predict {step}");
            let jitter = (step % 7) as f32 - 3.0;
            let z = [100.0 + step as f32 + jitter, 100.0 - jitter, 0.5, 80.0 + jitter * 0.1];
            (mean, cov) = kf.update(&mean, &cov, z);
            assert!(is_positive_definite(&cov), "after update {step}");
        }
    }

    #[test]
    fn test_gating_distance_grows_with_offset() {
        let kf = KalmanFilter::default();
        let (mean, cov) = kf.initiate([50.0, 50.0, 1.0, 40.0]);
        let (mean, cov) = kf.predict(&mean, &cov);
        let d = kf.gating_distance(
            &mean,
            &cov,
            &[[50.0, 50.0, 1.0, 40.0], [52.0, 51.0, 1.0, 40.0], [300.0, 300.0, 1.0, 40.0]],
        );
        assert_abs_diff_eq!(d[0], 0.0, epsilon = 1e-5);
        assert!(d[1] > d[0]);
        assert!(d[2] > 1000.0);
    }

    #[test]
    fn test_filter_bank_uses_class_profile() {
        let mut config = TrackerConfig::default();
        config
            .class_kalman
            .insert(2, KalmanConfig::default().scaled(3.0));
        let bank = FilterBank::from_config(&config);
        let (mean, cov) = bank.for_class(0).initiate([0.0, 0.0, 1.0, 100.0]);
        let (_, slow) = bank.for_class(0).predict(&mean, &cov);
        let (_, fast) = bank.for_class(2).predict(&mean, &cov);
        assert!(fast[[0, 0]] > slow[[0, 0]]);
    }

    #[test]
    fn test_diagonal_factor_keeps_variances() {
        let m = Matrix4::from_diagonal(&Vector4::new(4.0, 9.0, -1.0, 0.0));
        let chol = diagonal_factor(&m);
        assert_abs_diff_eq!(chol.l_dirty()[(0, 0)], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(chol.l_dirty()[(1, 1)], 3.0, epsilon = 1e-6);

        // L L^T reproduces the clamped variances
        let x = chol.solve(&Vector4::new(4.0, 9.0, 1.0, 1.0));
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(x[2], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(x[3], 1.0 / REPAIR_VARIANCE, epsilon = 1.0);
    }

    #[test]
    fn test_degenerate_covariance_is_repaired() {
        let mut cov = Array2::<f32>::eye(8);
        cov[[0, 0]] = -1.0;
        cov[[1, 2]] = f32::NAN;
        cov[[3, 4]] = 5.0;
        assert!(condition_covariance(&mut cov));
        assert!(is_positive_definite(&cov));
    }
}
