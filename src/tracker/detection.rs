//! Tracker input and output records.

use serde::{Deserialize, Serialize};

use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Geometry, confidence and class of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxDetection {
    pub bbox: Rect,
    pub score: f32,
    pub class_id: i32,
}

/// One detection of the current frame.
///
/// Detectors with a re-identification head emit `WithEmbedding`; plain
/// detectors emit `Plain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Detection {
    Plain(BoxDetection),
    WithEmbedding(BoxDetection, Vec<f32>),
}

impl Detection {
    /// Creates a plain detection from TLBR coordinates.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: i32) -> Self {
        Self::Plain(BoxDetection {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            score,
            class_id,
        })
    }

    pub fn from_rect(bbox: Rect, score: f32, class_id: i32) -> Self {
        Self::Plain(BoxDetection {
            bbox,
            score,
            class_id,
        })
    }

    /// Attaches (or replaces) an appearance embedding.
    pub fn with_embedding(self, embedding: Vec<f32>) -> Self {
        Self::WithEmbedding(*self.inner(), embedding)
    }

    pub fn inner(&self) -> &BoxDetection {
        match self {
            Self::Plain(d) | Self::WithEmbedding(d, _) => d,
        }
    }

    pub fn bbox(&self) -> Rect {
        self.inner().bbox
    }

    pub fn score(&self) -> f32 {
        self.inner().score
    }

    pub fn class_id(&self) -> i32 {
        self.inner().class_id
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        match self {
            Self::Plain(_) => None,
            Self::WithEmbedding(_, e) => Some(e),
        }
    }

    /// Finite coordinates, positive extent and a finite score.
    pub fn is_valid(&self) -> bool {
        let embedding_ok = self
            .embedding()
            .is_none_or(|e| !e.is_empty() && e.iter().all(|v| v.is_finite()));
        self.bbox().is_valid() && self.score().is_finite() && embedding_ok
    }
}

/// Tracker output: one entry per active track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub track_id: u64,
    /// Kalman-filtered box
    pub bbox: Rect,
    pub class_id: i32,
    pub score: f32,
    pub state: TrackState,
    pub age: u32,
    pub hits: u32,
    pub time_since_update: u32,
}

impl TrackedObject {
    pub fn tlbr(&self) -> [f32; 4] {
        self.bbox.to_tlbr()
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variants() {
        let det = Detection::new(10.0, 10.0, 50.0, 50.0, 0.9, 0);
        assert!(det.embedding().is_none());
        assert_eq!(det.bbox().to_tlbr(), [10.0, 10.0, 50.0, 50.0]);

        let det = det.with_embedding(vec![0.5, 0.5]);
        assert_eq!(det.embedding(), Some(&[0.5, 0.5][..]));
        assert_eq!(det.class_id(), 0);
    }

    #[test]
    fn test_validity() {
        assert!(Detection::new(10.0, 10.0, 50.0, 50.0, 0.9, 0).is_valid());
        assert!(!Detection::new(50.0, 10.0, 10.0, 50.0, 0.9, 0).is_valid());
        assert!(!Detection::new(10.0, 10.0, 50.0, 50.0, f32::NAN, 0).is_valid());
        assert!(
            !Detection::new(10.0, 10.0, 50.0, 50.0, 0.9, 0)
                .with_embedding(vec![])
                .is_valid()
        );
    }
}
