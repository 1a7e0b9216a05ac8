//! Thread-safe handle around a [`DeepSortTracker`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::tracker::config::TrackerConfig;
use crate::tracker::deep_sort::DeepSortTracker;
use crate::tracker::detection::{Detection, TrackedObject};

/// Cloneable handle; every clone drives the same tracker. The lock is held
/// for a whole frame, so concurrent callers are serialised frame by frame.
#[derive(Clone)]
pub struct SharedTracker {
    inner: Arc<Mutex<DeepSortTracker>>,
}

impl SharedTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        Ok(Self::from_tracker(DeepSortTracker::new(config)?))
    }

    pub fn from_tracker(tracker: DeepSortTracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    pub fn track(&self, detections: Vec<Detection>) -> Result<Vec<TrackedObject>> {
        self.inner.lock().track(detections)
    }

    /// Runs `f` with exclusive access to the tracker.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&mut DeepSortTracker) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn set_config(&self, config: TrackerConfig) -> Result<()> {
        self.inner.lock().set_config(config)
    }

    pub fn clean_counter(&self) {
        self.inner.lock().clean_counter();
    }

    pub fn get_trackers_inactive(&self) -> Vec<TrackedObject> {
        self.inner.lock().get_trackers_inactive()
    }

    pub fn unmatched_debug_info(&self) -> String {
        self.inner.lock().unmatched_debug_info()
    }
}
