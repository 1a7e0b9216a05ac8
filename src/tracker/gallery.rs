//! Bounded appearance history of a single track.

use std::collections::VecDeque;

use ndarray::{Array1, ArrayView1};

/// FIFO of L2-normalised embeddings; the oldest entry is evicted once the
/// budget is reached.
#[derive(Debug, Clone)]
pub struct FeatureGallery {
    budget: usize,
    update_interval: u32,
    since_last_insert: u32,
    features: VecDeque<Array1<f32>>,
}

impl FeatureGallery {
    pub fn new(budget: usize, update_interval: u32) -> Self {
        Self {
            budget: budget.max(1),
            update_interval: update_interval.max(1),
            since_last_insert: 0,
            features: VecDeque::with_capacity(budget.clamp(1, 16)),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Array1<f32>> {
        self.features.iter()
    }

    /// Offers an embedding from a matched detection. The first embedding is
    /// always stored; after that one embedding is kept every `update_interval`
    /// offers. Returns whether it was stored.
    pub fn offer(&mut self, embedding: &[f32]) -> bool {
        if !self.features.is_empty() {
            self.since_last_insert += 1;
            if self.since_last_insert < self.update_interval {
                return false;
            }
        }
        self.push(embedding);
        true
    }

    fn push(&mut self, embedding: &[f32]) {
        self.since_last_insert = 0;
        while self.features.len() >= self.budget {
            self.features.pop_front();
        }
        self.features.push_back(normalize(embedding));
    }

    /// Smallest cosine distance `1 - cos(theta)` between `query` and any stored
    /// embedding, or `None` when the gallery is empty.
    pub fn min_cosine_distance(&self, query: ArrayView1<f32>) -> Option<f32> {
        self.features
            .iter()
            .map(|f| 1.0 - f.dot(&query))
            .fold(None, |best, d| match best {
                Some(b) if b <= d => Some(b),
                _ => Some(d),
            })
    }
}

/// Scales `v` to unit length. A zero vector stays zero, which makes its
/// cosine distance to anything exactly 1.
pub fn normalize(v: &[f32]) -> Array1<f32> {
    let a = Array1::from_vec(v.to_vec());
    let norm = a.dot(&a).sqrt();
    if norm > f32::EPSILON { a / norm } else { a }
}
