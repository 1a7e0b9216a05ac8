//! Face to body identity linking.
//!
//! Faces and bodies are tracked by two independent trackers. A face whose box
//! sits inside a body box for enough consecutive frames is fused with that
//! body and from then on resolves to the body's id. Bodies are authoritative:
//! a body never takes a face's id.

use std::collections::{BTreeMap, HashMap, HashSet};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TrackerError};
use crate::tracker::config::AssignmentSolver;
use crate::tracker::cost_matrix::INFEASIBLE_COST;
use crate::tracker::detection::TrackedObject;
use crate::tracker::matching::{self, TieBreak};
use crate::tracker::rect::iou_batch;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Minimum fraction of the face box inside the body box
    pub min_containment: f32,
    /// Consecutive co-located frames before a pair is fused
    pub min_consecutive_frames: u32,
    pub solver: AssignmentSolver,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_containment: 0.8,
            min_consecutive_frames: 3,
            solver: AssignmentSolver::default(),
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_containment > 0.0 && self.min_containment <= 1.0) {
            return Err(TrackerError::config(
                "min_containment",
                format!("must lie in (0, 1], got {}", self.min_containment),
            ));
        }
        if self.min_consecutive_frames == 0 {
            return Err(TrackerError::config(
                "min_consecutive_frames",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Association between one face track and one body track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionLink {
    pub face_id: u64,
    pub body_id: u64,
    /// Consecutive frames the pair passed the containment test
    pub streak: u32,
    pub fused: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FusionLayer {
    config: FusionConfig,
    /// Keyed by face id
    links: BTreeMap<u64, FusionLink>,
    last_frame: Option<u64>,
}

impl FusionLayer {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Every live link, fused or still accumulating.
    pub fn links(&self) -> impl Iterator<Item = &FusionLink> {
        self.links.values()
    }

    /// Id the face should be reported under: the body's id once fused.
    pub fn resolve_identity(&self, face_id: u64) -> Option<u64> {
        self.links
            .get(&face_id)
            .filter(|link| link.fused)
            .map(|link| link.body_id)
    }

    pub fn reset(&mut self) {
        self.links.clear();
        self.last_frame = None;
    }

    /// Links the face and body tracks of frame `frame_id` and returns the
    /// fused pairs. Calling it again for the same frame changes nothing.
    pub fn fuse(
        &mut self,
        frame_id: u64,
        faces: &[TrackedObject],
        bodies: &[TrackedObject],
    ) -> Vec<FusionLink> {
        if self.last_frame == Some(frame_id) {
            return self.fused_links();
        }
        self.last_frame = Some(frame_id);

        let face_by_id: HashMap<u64, &TrackedObject> =
            faces.iter().map(|f| (f.track_id, f)).collect();
        let body_by_id: HashMap<u64, &TrackedObject> =
            bodies.iter().map(|b| (b.track_id, b)).collect();
        let min_containment = self.config.min_containment;
        let min_frames = self.config.min_consecutive_frames;

        // existing links: dropped with their tracks, extended while co-located
        self.links.retain(|_, link| {
            let face = face_by_id.get(&link.face_id);
            let body = body_by_id.get(&link.body_id);
            let (Some(face), Some(body)) = (face, body) else {
                debug!(face_id = link.face_id, body_id = link.body_id, "fusion link dropped");
                return false;
            };
            if is_candidate(face, body, min_containment) {
                link.streak = link.streak.saturating_add(1);
                link.fused |= link.streak >= min_frames;
                true
            } else {
                link.fused
            }
        });

        let linked_faces: HashSet<u64> = self.links.keys().copied().collect();
        let taken_bodies: HashSet<u64> = self.links.values().map(|l| l.body_id).collect();
        let free_bodies: Vec<&TrackedObject> = bodies
            .iter()
            .filter(|b| b.time_since_update == 0 && !taken_bodies.contains(&b.track_id))
            .collect();
        let free_faces: Vec<&TrackedObject> = faces
            .iter()
            .filter(|f| f.time_since_update == 0 && !linked_faces.contains(&f.track_id))
            .collect();

        for (body, face) in self.pair_up(&free_bodies, &free_faces) {
            let link = FusionLink {
                face_id: face.track_id,
                body_id: body.track_id,
                streak: 1,
                fused: min_frames <= 1,
            };
            debug!(face_id = link.face_id, body_id = link.body_id, "fusion candidate");
            self.links.insert(face.track_id, link);
        }

        self.fused_links()
    }

    /// Assignment of free faces to free bodies on `1 - containment`. Bodies
    /// are the rows so that ties go to the lower body id.
    fn pair_up<'a>(
        &self,
        bodies: &[&'a TrackedObject],
        faces: &[&'a TrackedObject],
    ) -> Vec<(&'a TrackedObject, &'a TrackedObject)> {
        if bodies.is_empty() || faces.is_empty() {
            return Vec::new();
        }

        let min_containment = self.config.min_containment;
        let cost = Array2::from_shape_fn((bodies.len(), faces.len()), |(i, j)| {
            let containment = faces[j].bbox.containment_in(&bodies[i].bbox);
            if containment >= min_containment {
                1.0 - containment
            } else {
                INFEASIBLE_COST
            }
        });

        let body_rects: Vec<_> = bodies.iter().map(|b| b.bbox).collect();
        let face_rects: Vec<_> = faces.iter().map(|f| f.bbox).collect();
        let iou = iou_batch(&body_rects, &face_rects);
        let body_ids: Vec<u64> = bodies.iter().map(|b| b.track_id).collect();

        let result = matching::linear_assignment(
            &cost,
            1.0 - min_containment,
            self.config.solver,
            Some(TieBreak {
                iou: &iou,
                track_ids: &body_ids,
            }),
        );
        result
            .matches
            .into_iter()
            .map(|(i, j)| (bodies[i], faces[j]))
            .collect()
    }

    fn fused_links(&self) -> Vec<FusionLink> {
        self.links.values().filter(|l| l.fused).copied().collect()
    }
}

fn is_candidate(face: &TrackedObject, body: &TrackedObject, min_containment: f32) -> bool {
    face.time_since_update == 0
        && body.time_since_update == 0
        && face.bbox.containment_in(&body.bbox) >= min_containment
}
