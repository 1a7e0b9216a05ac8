//! Association costs between tracks and detections.
//!
//! Every matrix is indexed `[row, col]` by positions in the `track_indices`
//! and `detection_indices` slices handed to the builder, not by positions in
//! the underlying track and detection lists.

use ndarray::Array2;

use crate::tracker::detection::Detection;
use crate::tracker::gallery::normalize;
use crate::tracker::kalman_filter::FilterBank;
use crate::tracker::rect::Rect;
use crate::tracker::track::Track;

/// Cost written into gated pairs. Larger than any feasible cost, smaller than
/// the padding used by the solver.
pub const INFEASIBLE_COST: f32 = 1e5;

/// Distance used to score a track/detection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostMetric {
    /// Minimum cosine distance to the track's gallery
    Appearance,
    /// Squared Mahalanobis distance of the detection to the predicted state
    Mahalanobis,
    /// `1 - IOU` against the last associated box
    Iou,
}

/// Builds gated cost matrices for one frame.
#[derive(Clone, Copy)]
pub struct CostMatrixBuilder<'a> {
    tracks: &'a [Track],
    detections: &'a [Detection],
    filters: &'a FilterBank,
    chi2_threshold: f32,
}

impl<'a> CostMatrixBuilder<'a> {
    pub fn new(
        tracks: &'a [Track],
        detections: &'a [Detection],
        filters: &'a FilterBank,
        chi2_threshold: f32,
    ) -> Self {
        Self {
            tracks,
            detections,
            filters,
            chi2_threshold,
        }
    }

    pub fn tracks(&self) -> &'a [Track] {
        self.tracks
    }

    /// Raw `metric` costs with every gate applied.
    ///
    /// A pair becomes [`INFEASIBLE_COST`] when the classes differ or when its
    /// cost exceeds `max_distance`. Appearance and Mahalanobis costs are also
    /// gated by the chi-square motion test; IOU costs only need overlap.
    pub fn build(
        &self,
        metric: CostMetric,
        max_distance: f32,
        track_indices: &[usize],
        detection_indices: &[usize],
    ) -> Array2<f32> {
        let mut cost = match metric {
            CostMetric::Appearance => {
                let mut cost = self.appearance_cost(track_indices, detection_indices);
                let motion = self.mahalanobis_cost(track_indices, detection_indices);
                gate_by_motion(&mut cost, &motion, self.chi2_threshold);
                cost
            }
            CostMetric::Mahalanobis => {
                let mut cost = self.mahalanobis_cost(track_indices, detection_indices);
                let motion = cost.clone();
                gate_by_motion(&mut cost, &motion, self.chi2_threshold);
                cost
            }
            CostMetric::Iou => self.iou_cost(track_indices, detection_indices),
        };

        self.gate_by_class(&mut cost, track_indices, detection_indices);
        gate_by_threshold(&mut cost, max_distance);
        cost
    }

    /// Ungated IOU between the last associated track boxes and the detections.
    pub fn iou_matrix(&self, track_indices: &[usize], detection_indices: &[usize]) -> Array2<f32> {
        let track_rects: Vec<Rect> = track_indices
            .iter()
            .map(|&i| self.tracks[i].last_bbox)
            .collect();
        let det_rects: Vec<Rect> = detection_indices
            .iter()
            .map(|&j| self.detections[j].bbox())
            .collect();
        crate::tracker::rect::iou_batch(&track_rects, &det_rects)
    }

    pub fn iou_cost(&self, track_indices: &[usize], detection_indices: &[usize]) -> Array2<f32> {
        self.iou_matrix(track_indices, detection_indices)
            .mapv_into(|iou| 1.0 - iou)
    }

    /// Pairs where either side has no embedding are infeasible.
    pub fn appearance_cost(
        &self,
        track_indices: &[usize],
        detection_indices: &[usize],
    ) -> Array2<f32> {
        let queries: Vec<_> = detection_indices
            .iter()
            .map(|&j| self.detections[j].embedding().map(normalize))
            .collect();

        let mut cost = Array2::from_elem(
            (track_indices.len(), detection_indices.len()),
            INFEASIBLE_COST,
        );
        for (row, &i) in track_indices.iter().enumerate() {
            let gallery = &self.tracks[i].gallery;
            for (col, query) in queries.iter().enumerate() {
                if let Some(d) = query
                    .as_ref()
                    .and_then(|q| gallery.min_cosine_distance(q.view()))
                {
                    cost[[row, col]] = d;
                }
            }
        }
        cost
    }

    pub fn mahalanobis_cost(
        &self,
        track_indices: &[usize],
        detection_indices: &[usize],
    ) -> Array2<f32> {
        let measurements: Vec<[f32; 4]> = detection_indices
            .iter()
            .map(|&j| self.detections[j].bbox().to_xyah())
            .collect();

        let mut cost = Array2::zeros((track_indices.len(), detection_indices.len()));
        for (row, &i) in track_indices.iter().enumerate() {
            let track = &self.tracks[i];
            let kf = self.filters.for_class(track.class_id);
            let distances = kf.gating_distance(&track.mean, &track.covariance, &measurements);
            for (col, d) in distances.into_iter().enumerate() {
                cost[[row, col]] = d;
            }
        }
        cost
    }

    fn gate_by_class(
        &self,
        cost: &mut Array2<f32>,
        track_indices: &[usize],
        detection_indices: &[usize],
    ) {
        for (row, &i) in track_indices.iter().enumerate() {
            let class_id = self.tracks[i].class_id;
            for (col, &j) in detection_indices.iter().enumerate() {
                if self.detections[j].class_id() != class_id {
                    cost[[row, col]] = INFEASIBLE_COST;
                }
            }
        }
    }
}

/// Marks every pair whose squared Mahalanobis distance exceeds `chi2_threshold`.
pub fn gate_by_motion(cost: &mut Array2<f32>, mahalanobis: &Array2<f32>, chi2_threshold: f32) {
    ndarray::Zip::from(cost)
        .and(mahalanobis)
        .for_each(|c, &d| {
            if d.is_nan() || d > chi2_threshold {
                *c = INFEASIBLE_COST;
            }
        });
}

/// Marks every pair costlier than `max_distance`, including non-finite costs.
pub fn gate_by_threshold(cost: &mut Array2<f32>, max_distance: f32) {
    cost.mapv_inplace(|c| if c <= max_distance { c } else { INFEASIBLE_COST });
}
