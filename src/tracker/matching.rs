//! Assignment of detections to tracks.

use std::cmp::Ordering;
use std::collections::HashSet;

use ndarray::Array2;
use tracing::{trace, warn};

use crate::tracker::config::AssignmentSolver;
use crate::tracker::cost_matrix::{CostMatrixBuilder, CostMetric, INFEASIBLE_COST};

/// Cost of the dummy rows/columns that square the matrix for the solver.
const PADDING_COST: f64 = 1e6;
/// Upper bound on the tie-break perturbation of a single entry.
const MAX_TIE_SCALE: f64 = 1e-4;
/// Weight of the track id key relative to the IOU key.
const ID_TIE_RATIO: f64 = 1e-2;

/// Result of one assignment problem, in row/column positions of its matrix.
#[derive(Debug, Clone, Default)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Secondary keys for resolving equal costs: higher IOU first, then the lower
/// track id.
#[derive(Debug, Clone, Copy)]
pub struct TieBreak<'a> {
    pub iou: &'a Array2<f32>,
    pub track_ids: &'a [u64],
}

/// Solves the rectangular assignment problem on `cost_matrix` and drops any
/// pair costing more than `thresh`.
pub fn linear_assignment(
    cost_matrix: &Array2<f32>,
    thresh: f32,
    solver: AssignmentSolver,
    tie_break: Option<TieBreak<'_>>,
) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: vec![],
            unmatched_detections: (0..num_cols).collect(),
        };
    }

    if num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: vec![],
        };
    }

    match solver {
        AssignmentSolver::Greedy => greedy_assignment(cost_matrix, thresh, tie_break),
        AssignmentSolver::Optimal => optimal_assignment(cost_matrix, thresh, tie_break)
            .unwrap_or_else(|| {
                warn!(num_rows, num_cols, "lapjv failed, falling back to greedy assignment");
                greedy_assignment(cost_matrix, thresh, tie_break)
            }),
    }
}

fn is_feasible(cost: f32, thresh: f32) -> bool {
    cost <= thresh && cost < INFEASIBLE_COST
}

/// Rank of each row when ordered by track id.
fn id_ranks(track_ids: &[u64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..track_ids.len()).collect();
    order.sort_by_key(|&i| track_ids[i]);
    let mut ranks = vec![0; track_ids.len()];
    for (rank, row) in order.into_iter().enumerate() {
        ranks[row] = rank;
    }
    ranks
}

/// Perturbation scale small enough that the summed perturbation of any
/// assignment stays below the smallest gap between distinct costs, so only
/// exactly equal costs are reordered.
fn tie_scale(cost_matrix: &Array2<f32>) -> f64 {
    let mut values: Vec<f64> = cost_matrix
        .iter()
        .filter(|c| c.is_finite() && **c < INFEASIBLE_COST)
        .map(|&c| c as f64)
        .collect();
    values.sort_by(f64::total_cmp);
    values.dedup();

    let min_gap = values
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    if !min_gap.is_finite() {
        return MAX_TIE_SCALE;
    }

    // each entry carries at most (1 + ID_TIE_RATIO) * scale
    let size = cost_matrix.nrows().max(cost_matrix.ncols()) as f64;
    (min_gap / (4.0 * size)).min(MAX_TIE_SCALE)
}

fn optimal_assignment(
    cost_matrix: &Array2<f32>,
    thresh: f32,
    tie_break: Option<TieBreak<'_>>,
) -> Option<AssignmentResult> {
    let (num_rows, num_cols) = cost_matrix.dim();
    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), PADDING_COST);

    let ranks = tie_break.map(|tb| id_ranks(tb.track_ids));
    let scale = tie_scale(cost_matrix);
    for i in 0..num_rows {
        for j in 0..num_cols {
            let cost = cost_matrix[[i, j]];
            let mut value = cost as f64;
            if let (Some(tb), Some(ranks)) = (tie_break, ranks.as_ref()) {
                if cost.is_finite() && cost < INFEASIBLE_COST {
                    let iou = (tb.iou[[i, j]] as f64).clamp(0.0, 1.0);
                    value += scale * (1.0 - iou);
                    value += scale * ID_TIE_RATIO * ranks[i] as f64 / num_rows as f64;
                }
            }
            padded[[i, j]] = value;
        }
    }

    let (row_to_col, _) = lapjv::lapjv(&padded).ok()?;
    let mut matches = vec![];
    let mut unmatched_tracks = vec![];
    let mut unmatched_detections_mask: Vec<bool> = vec![true; num_cols];

    for (row_idx, &col_idx) in row_to_col.iter().enumerate().take(num_rows) {
        if col_idx < num_cols && is_feasible(cost_matrix[[row_idx, col_idx]], thresh) {
            matches.push((row_idx, col_idx));
            unmatched_detections_mask[col_idx] = false;
        } else {
            unmatched_tracks.push(row_idx);
        }
    }

    Some(AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections: collect_unmatched(&unmatched_detections_mask),
    })
}

/// Repeatedly takes the cheapest remaining feasible pair.
fn greedy_assignment(
    cost_matrix: &Array2<f32>,
    thresh: f32,
    tie_break: Option<TieBreak<'_>>,
) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    let mut candidates: Vec<(usize, usize)> = cost_matrix
        .indexed_iter()
        .filter(|&(_, &c)| is_feasible(c, thresh))
        .map(|(ij, _)| ij)
        .collect();

    candidates.sort_by(|&(ai, aj), &(bi, bj)| {
        let by_cost = cost_matrix[[ai, aj]].total_cmp(&cost_matrix[[bi, bj]]);
        let by_tie = match tie_break {
            Some(tb) => tb.iou[[bi, bj]]
                .total_cmp(&tb.iou[[ai, aj]])
                .then(tb.track_ids[ai].cmp(&tb.track_ids[bi])),
            None => Ordering::Equal,
        };
        by_cost.then(by_tie).then(ai.cmp(&bi)).then(aj.cmp(&bj))
    });

    let mut row_free = vec![true; num_rows];
    let mut col_free = vec![true; num_cols];
    let mut matches = vec![];
    for (i, j) in candidates {
        if row_free[i] && col_free[j] {
            row_free[i] = false;
            col_free[j] = false;
            matches.push((i, j));
        }
    }

    AssignmentResult {
        matches,
        unmatched_tracks: collect_unmatched(&row_free),
        unmatched_detections: collect_unmatched(&col_free),
    }
}

fn collect_unmatched(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &u)| if u { Some(i) } else { None })
        .collect()
}

/// Metric, gate and solver of one association stage.
#[derive(Debug, Clone, Copy)]
pub struct MatchStage {
    pub metric: CostMetric,
    pub max_distance: f32,
    pub solver: AssignmentSolver,
}

/// Matches in terms of indices into the builder's track and detection lists.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// One assignment over the given subsets of tracks and detections.
pub fn min_cost_matching(
    builder: &CostMatrixBuilder<'_>,
    stage: MatchStage,
    track_indices: &[usize],
    detection_indices: &[usize],
) -> MatchResult {
    if track_indices.is_empty() || detection_indices.is_empty() {
        return MatchResult {
            matches: vec![],
            unmatched_tracks: track_indices.to_vec(),
            unmatched_detections: detection_indices.to_vec(),
        };
    }

    let cost = builder.build(
        stage.metric,
        stage.max_distance,
        track_indices,
        detection_indices,
    );
    let iou = builder.iou_matrix(track_indices, detection_indices);
    let track_ids: Vec<u64> = track_indices
        .iter()
        .map(|&i| builder.tracks()[i].track_id)
        .collect();

    let AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    } = linear_assignment(
        &cost,
        stage.max_distance,
        stage.solver,
        Some(TieBreak {
            iou: &iou,
            track_ids: &track_ids,
        }),
    );

    MatchResult {
        matches: matches
            .into_iter()
            .map(|(r, c)| (track_indices[r], detection_indices[c]))
            .collect(),
        unmatched_tracks: unmatched_tracks.into_iter().map(|r| track_indices[r]).collect(),
        unmatched_detections: unmatched_detections
            .into_iter()
            .map(|c| detection_indices[c])
            .collect(),
    }
}

/// Matches tracks in order of increasing `time_since_update`, so that
/// recently seen tracks get first pick of the detections.
pub fn matching_cascade(
    builder: &CostMatrixBuilder<'_>,
    stage: MatchStage,
    cascade_depth: u32,
    track_indices: &[usize],
    detection_indices: &[usize],
) -> MatchResult {
    let mut unmatched_detections = detection_indices.to_vec();
    let mut matches = Vec::new();

    for level in 0..=cascade_depth {
        if unmatched_detections.is_empty() {
            break;
        }

        let level_tracks: Vec<usize> = track_indices
            .iter()
            .copied()
            .filter(|&i| builder.tracks()[i].time_since_update == level)
            .collect();
        if level_tracks.is_empty() {
            continue;
        }

        let result = min_cost_matching(builder, stage, &level_tracks, &unmatched_detections);
        trace!(
            level,
            tracks = level_tracks.len(),
            matched = result.matches.len(),
            "cascade level"
        );
        matches.extend(result.matches);
        unmatched_detections = result.unmatched_detections;
    }

    let matched: HashSet<usize> = matches.iter().map(|&(t, _)| t).collect();
    let unmatched_tracks = track_indices
        .iter()
        .copied()
        .filter(|i| !matched.contains(i))
        .collect();

    MatchResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::config::TrackerConfig;
    use crate::tracker::detection::Detection;
    use crate::tracker::kalman_filter::{FilterBank, KalmanFilter};
    use crate::tracker::track::Track;
    use ndarray::array;

    const SOLVERS: [AssignmentSolver; 2] = [AssignmentSolver::Optimal, AssignmentSolver::Greedy];

    #[test]
    fn test_empty_inputs() {
        for solver in SOLVERS {
            let result = linear_assignment(&Array2::zeros((0, 3)), 0.5, solver, None);
            assert!(result.matches.is_empty());
            assert_eq!(result.unmatched_detections, vec![0, 1, 2]);

            let result = linear_assignment(&Array2::zeros((2, 0)), 0.5, solver, None);
            assert_eq!(result.unmatched_tracks, vec![0, 1]);
            assert!(result.unmatched_detections.is_empty());
        }
    }

    #[test]
    fn test_fully_gated() {
        let cost = Array2::from_elem((2, 3), INFEASIBLE_COST);
        for solver in SOLVERS {
            let result = linear_assignment(&cost, 0.5, solver, None);
            assert!(result.matches.is_empty());
            assert_eq!(result.unmatched_tracks, vec![0, 1]);
            assert_eq!(result.unmatched_detections, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_optimal_beats_greedy() {
        let cost = array![[0.1_f32, 0.2], [0.15, 0.9]];

        let optimal = linear_assignment(&cost, 0.5, AssignmentSolver::Optimal, None);
        let mut matches = optimal.matches.clone();
        matches.sort();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);

        let greedy = linear_assignment(&cost, 0.5, AssignmentSolver::Greedy, None);
        assert_eq!(greedy.matches, vec![(0, 0)]);
        assert_eq!(greedy.unmatched_tracks, vec![1]);
        assert_eq!(greedy.unmatched_detections, vec![1]);
    }

    #[test]
    fn test_threshold_drops_pairs() {
        let cost = array![[0.3_f32], [0.8]];
        for solver in SOLVERS {
            let result = linear_assignment(&cost, 0.5, solver, None);
            assert_eq!(result.matches, vec![(0, 0)]);
            assert_eq!(result.unmatched_tracks, vec![1]);
        }
    }

    #[test]
    fn test_tie_prefers_lower_track_id() {
        let cost = array![[0.3_f32], [0.3]];
        let iou = array![[0.5_f32], [0.5]];
        let track_ids = [5, 2];
        for solver in SOLVERS {
            let tb = TieBreak {
                iou: &iou,
                track_ids: &track_ids,
            };
            let result = linear_assignment(&cost, 0.5, solver, Some(tb));
            assert_eq!(result.matches, vec![(1, 0)], "{solver:?}");
        }
    }

    #[test]
    fn test_tie_prefers_higher_iou() {
        let cost = array![[0.3_f32], [0.3]];
        let iou = array![[0.2_f32], [0.6]];
        let track_ids = [1, 2];
        for solver in SOLVERS {
            let tb = TieBreak {
                iou: &iou,
                track_ids: &track_ids,
            };
            let result = linear_assignment(&cost, 0.5, solver, Some(tb));
            assert_eq!(result.matches, vec![(1, 0)], "{solver:?}");
        }
    }

    #[test]
    fn test_tie_break_never_overrides_cost() {
        let cost = array![[0.30000_f32], [0.30005]];
        let iou = array![[0.0_f32], [1.0]];
        let track_ids = [1, 2];
        for solver in SOLVERS {
            let tb = TieBreak {
                iou: &iou,
                track_ids: &track_ids,
            };
            let result = linear_assignment(&cost, 0.5, solver, Some(tb));
            assert_eq!(result.matches, vec![(0, 0)], "{solver:?}");
        }
    }

    #[test]
    fn test_tie_break_on_full_assignment() {
        // every assignment costs the same; the higher-IOU one must win
        let cost = array![[0.4_f32, 0.4], [0.4, 0.4]];
        let iou = array![[0.1_f32, 0.9], [0.9, 0.1]];
        let track_ids = [1, 2];
        let tb = TieBreak {
            iou: &iou,
            track_ids: &track_ids,
        };
        for solver in SOLVERS {
            let result = linear_assignment(&cost, 0.6, solver, Some(tb));
            let mut matches = result.matches;
            matches.sort();
            assert_eq!(matches, vec![(0, 1), (1, 0)], "{solver:?}");
        }
    }

    fn track(id: u64, x: f32, misses: u32) -> Track {
        let config = TrackerConfig {
            n_init: 1,
            ..Default::default()
        };
        let det = Detection::new(x, 0.0, x + 40.0, 80.0, 0.9, 0);
        let mut track = Track::new(id, &det, &KalmanFilter::default(), &config);
        track.time_since_update = misses;
        track
    }

    #[test]
    fn test_cascade_prefers_recent_tracks() {
        // two tracks on top of each other; the stale one must lose
        let tracks = vec![track(1, 0.0, 3), track(2, 0.0, 0)];
        let detections = vec![Detection::new(0.0, 0.0, 40.0, 80.0, 0.9, 0)];
        let filters = FilterBank::default();
        let builder = CostMatrixBuilder::new(&tracks, &detections, &filters, 9.4877);
        let stage = MatchStage {
            metric: CostMetric::Mahalanobis,
            max_distance: 9.4877,
            solver: AssignmentSolver::Optimal,
        };

        let result = matching_cascade(&builder, stage, 5, &[0, 1], &[0]);
        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_cascade_skips_tracks_beyond_depth() {
        let tracks = vec![track(1, 0.0, 4)];
        let detections = vec![Detection::new(0.0, 0.0, 40.0, 80.0, 0.9, 0)];
        let filters = FilterBank::default();
        let builder = CostMatrixBuilder::new(&tracks, &detections, &filters, 9.4877);
        let stage = MatchStage {
            metric: CostMetric::Iou,
            max_distance: 0.7,
            solver: AssignmentSolver::Greedy,
        };

        let result = matching_cascade(&builder, stage, 3, &[0], &[0]);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_min_cost_matching_maps_indices() {
        let tracks = vec![track(1, 0.0, 0), track(2, 300.0, 0)];
        let detections = vec![
            Detection::new(305.0, 0.0, 345.0, 80.0, 0.9, 0),
            Detection::new(2.0, 0.0, 42.0, 80.0, 0.9, 0),
        ];
        let filters = FilterBank::default();
        let builder = CostMatrixBuilder::new(&tracks, &detections, &filters, 9.4877);
        let stage = MatchStage {
            metric: CostMetric::Iou,
            max_distance: 0.7,
            solver: AssignmentSolver::Optimal,
        };

        let result = min_cost_matching(&builder, stage, &[1, 0], &[0, 1]);
        let mut matches = result.matches;
        matches.sort();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);
    }
}
