//! DeepSORT track manager.

use std::collections::HashSet;
use std::fmt::Write as _;

use tracing::{debug, info, trace, warn};

use crate::error::{Result, TrackerError};
use crate::tracker::config::TrackerConfig;
use crate::tracker::cost_matrix::{CostMatrixBuilder, CostMetric};
use crate::tracker::detection::{Detection, TrackedObject};
use crate::tracker::id_allocator::IdAllocator;
use crate::tracker::kalman_filter::FilterBank;
use crate::tracker::matching::{self, MatchResult, MatchStage};
use crate::tracker::track::{Lifecycle, Track};

/// A deleted track that was confirmed at the time of deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct InactiveTrack {
    pub object: TrackedObject,
    pub deleted_at_frame: u64,
}

/// Multi-object tracker: Kalman prediction, cascade matching on appearance
/// or motion, IOU fallback, and track lifecycle management.
pub struct DeepSortTracker {
    tracks: Vec<Track>,
    inactive: Vec<InactiveTrack>,
    frame_id: u64,
    /// `predict` already ran for the frame `update` will close
    predicted: bool,
    config: TrackerConfig,
    filters: FilterBank,
    ids: IdAllocator,
    /// Embedding length learned from the first embedding seen
    learned_embedding_dim: Option<usize>,
}

impl DeepSortTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tracks: Vec::new(),
            inactive: Vec::new(),
            frame_id: 0,
            predicted: false,
            filters: FilterBank::from_config(&config),
            ids: IdAllocator::new(config.use_specific_counter),
            learned_embedding_dim: None,
            config,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Replaces the configuration. Existing tracks pick up the new lifecycle
    /// thresholds and Kalman profiles; galleries keep their current budget.
    pub fn set_config(&mut self, config: TrackerConfig) -> Result<()> {
        config.validate()?;
        if let Some(dim) = config.embedding_dim {
            let stored = self.stored_embedding_dim();
            if stored.is_some_and(|s| s != dim) {
                return Err(TrackerError::config(
                    "embedding_dim",
                    format!("tracks already hold embeddings of length {stored:?}, got {dim}"),
                ));
            }
        }

        let lifecycle = Lifecycle::from(&config);
        for track in &mut self.tracks {
            track.set_lifecycle(lifecycle);
        }
        self.filters = FilterBank::from_config(&config);
        self.ids.set_per_class(config.use_specific_counter);
        self.config = config;
        Ok(())
    }

    fn stored_embedding_dim(&self) -> Option<usize> {
        self.tracks
            .iter()
            .find_map(|t| t.gallery.iter().next().map(|f| f.len()))
    }

    /// Active (not deleted) tracks.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// First active track with `track_id`. With per-class counters an id can
    /// exist once per class.
    pub fn track_by_id(&self, track_id: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    /// Number of frames started so far.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Starts a new frame by propagating every track one step. Calling it
    /// again before [`update`](Self::update) does nothing.
    pub fn predict(&mut self) {
        if self.predicted {
            return;
        }
        self.frame_id += 1;
        for track in &mut self.tracks {
            track.predict(self.filters.for_class(track.class_id));
        }
        self.predicted = true;
        trace!(frame_id = self.frame_id, tracks = self.tracks.len(), "predicted");
    }

    /// Predicts then updates with the detections of the new frame. A frame
    /// rejected by input validation leaves the tracker untouched.
    pub fn track(&mut self, detections: Vec<Detection>) -> Result<Vec<TrackedObject>> {
        self.update(detections)
    }

    /// Closes the current frame with its detections and returns the active
    /// tracks. Runs [`predict`](Self::predict) first when the caller did not.
    ///
    /// Malformed detections are dropped with a warning. An embedding whose
    /// length differs from the session's is rejected before any state changes.
    pub fn update(&mut self, detections: Vec<Detection>) -> Result<Vec<TrackedObject>> {
        let detections = self.sanitize(detections)?;
        self.predict();

        let result = self.associate(&detections);

        // everything fallible happens before the tracks are touched
        let mut ids = self.ids.clone();
        let new_ids = result
            .unmatched_detections
            .iter()
            .map(|&j| ids.allocate(detections[j].class_id()))
            .collect::<Result<Vec<u64>>>()?;
        self.tracks.try_reserve(new_ids.len())?;
        self.inactive.try_reserve(result.unmatched_tracks.len())?;
        self.ids = ids;

        for &(i, j) in &result.matches {
            let track = &mut self.tracks[i];
            track.update(&detections[j], self.filters.for_class(track.class_id));
        }

        for &i in &result.unmatched_tracks {
            let track = &mut self.tracks[i];
            let was_confirmed = track.is_confirmed();
            track.mark_missed();
            if track.is_deleted() {
                debug!(track_id = track.track_id, "track deleted");
                if was_confirmed {
                    self.inactive.push(InactiveTrack {
                        object: track.to_object(),
                        deleted_at_frame: self.frame_id,
                    });
                }
            }
        }
        self.tracks.retain(|t| !t.is_deleted());

        for (&j, track_id) in result.unmatched_detections.iter().zip(new_ids) {
            let detection = &detections[j];
            let kf = self.filters.for_class(detection.class_id());
            self.tracks
                .push(Track::new(track_id, detection, kf, &self.config));
            debug!(track_id, class_id = detection.class_id(), "track created");
        }

        let grace = u64::from(self.config.inactive_grace_frames);
        let frame_id = self.frame_id;
        self.inactive
            .retain(|t| frame_id.saturating_sub(t.deleted_at_frame) <= grace);

        self.predicted = false;
        Ok(self.tracks.iter().map(Track::to_object).collect())
    }

    /// Drops malformed detections and checks embedding lengths.
    fn sanitize(&mut self, detections: Vec<Detection>) -> Result<Vec<Detection>> {
        let total = detections.len();
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| {
                let ok = d.is_valid();
                if !ok {
                    warn!(bbox = ?d.bbox(), score = d.score(), "discarding invalid detection");
                }
                ok
            })
            .collect();
        if detections.len() < total {
            debug!(discarded = total - detections.len(), "invalid detections dropped");
        }

        let mut expected = self.config.embedding_dim.or(self.learned_embedding_dim);
        for embedding in detections.iter().filter_map(Detection::embedding) {
            match expected {
                Some(dim) if dim != embedding.len() => {
                    return Err(TrackerError::EmbeddingDimension {
                        expected: dim,
                        found: embedding.len(),
                    });
                }
                Some(_) => {}
                None => expected = Some(embedding.len()),
            }
        }
        if self.config.embedding_dim.is_none() {
            self.learned_embedding_dim = expected;
        }
        Ok(detections)
    }

    /// Cascade on appearance (or motion), then IOU for the leftovers.
    fn associate(&self, detections: &[Detection]) -> MatchResult {
        let config = &self.config;
        let builder = CostMatrixBuilder::new(
            &self.tracks,
            detections,
            &self.filters,
            config.chi2_threshold(),
        );

        let appearance = config.use_reid && detections.iter().any(|d| d.embedding().is_some());
        let cascade_stage = if appearance {
            MatchStage {
                metric: CostMetric::Appearance,
                max_distance: config.max_cosine_distance,
                solver: config.solver,
            }
        } else {
            MatchStage {
                metric: CostMetric::Mahalanobis,
                max_distance: config.chi2_threshold(),
                solver: config.solver,
            }
        };

        let cascade_tracks: Vec<usize> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_confirmed() && !(appearance && t.gallery.is_empty()))
            .map(|(i, _)| i)
            .collect();
        let all_detections: Vec<usize> = (0..detections.len()).collect();

        let cascade = matching::matching_cascade(
            &builder,
            cascade_stage,
            config.max_age,
            &cascade_tracks,
            &all_detections,
        );
        debug!(
            frame_id = self.frame_id,
            metric = ?cascade_stage.metric,
            candidates = cascade_tracks.len(),
            matched = cascade.matches.len(),
            "cascade stage"
        );

        let cascade_matched: HashSet<usize> = cascade.matches.iter().map(|&(i, _)| i).collect();
        let iou_tracks: Vec<usize> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|&(i, t)| {
                !cascade_matched.contains(&i)
                    && (t.is_tentative()
                        || (t.is_confirmed()
                            && t.time_since_update <= config.max_iou_stage_misses))
            })
            .map(|(i, _)| i)
            .collect();

        let iou_stage = MatchStage {
            metric: CostMetric::Iou,
            max_distance: config.max_iou_distance,
            solver: config.solver,
        };
        let iou = matching::min_cost_matching(
            &builder,
            iou_stage,
            &iou_tracks,
            &cascade.unmatched_detections,
        );
        debug!(
            frame_id = self.frame_id,
            candidates = iou_tracks.len(),
            matched = iou.matches.len(),
            "iou stage"
        );

        let mut matches = cascade.matches;
        matches.extend(iou.matches);
        let matched: HashSet<usize> = matches.iter().map(|&(i, _)| i).collect();
        let unmatched_tracks = (0..self.tracks.len())
            .filter(|i| !matched.contains(i))
            .collect();

        MatchResult {
            matches,
            unmatched_tracks,
            unmatched_detections: iou.unmatched_detections,
        }
    }

    /// Restarts id allocation at 1. Active tracks keep their ids.
    pub fn clean_counter(&mut self) {
        self.ids.reset();
        info!(frame_id = self.frame_id, "track id counters reset");
    }

    /// Snapshots of confirmed tracks deleted within the grace window.
    pub fn get_trackers_inactive(&self) -> Vec<TrackedObject> {
        self.inactive.iter().map(|t| t.object).collect()
    }

    pub fn inactive_tracks(&self) -> &[InactiveTrack] {
        &self.inactive
    }

    /// Active tracks that received no detection in the last frame.
    pub fn unmatched_last_frame(&self) -> Vec<TrackedObject> {
        self.tracks
            .iter()
            .filter(|t| t.time_since_update > 0)
            .map(Track::to_object)
            .collect()
    }

    /// Text dump of [`unmatched_last_frame`](Self::unmatched_last_frame): the
    /// count on the first line, then `id,state,x1,y1,x2,y2` per track.
    pub fn unmatched_debug_info(&self) -> String {
        let unmatched = self.unmatched_last_frame();
        let mut out = format!("{}\n", unmatched.len());
        for obj in &unmatched {
            let [x1, y1, x2, y2] = obj.tlbr();
            let _ = writeln!(
                out,
                "{},{},{:.1},{:.1},{:.1},{:.1}",
                obj.track_id, obj.state, x1, y1, x2, y2
            );
        }
        out
    }
}
