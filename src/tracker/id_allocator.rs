//! Track id allocation.

use std::collections::BTreeMap;

use crate::error::{Result, TrackerError};

/// Hands out track ids starting at 1, either from one shared sequence or from
/// one sequence per class.
///
/// Owned by a single tracker, so two trackers in one process never share id
/// state.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    per_class: bool,
    global: u64,
    /// Starting point of class sequences not seen yet
    floor: u64,
    class_counters: BTreeMap<i32, u64>,
}

impl IdAllocator {
    pub fn new(per_class: bool) -> Self {
        Self {
            per_class,
            ..Default::default()
        }
    }

    /// Switches between the shared and the per-class sequence. Ids handed out
    /// afterwards never collide with ids handed out before the switch.
    pub fn set_per_class(&mut self, per_class: bool) {
        if per_class == self.per_class {
            return;
        }
        if per_class {
            self.floor = self.global;
            self.class_counters.clear();
        } else {
            let highest = self.class_counters.values().copied().max().unwrap_or(0);
            self.global = self.global.max(self.floor).max(highest);
        }
        self.per_class = per_class;
    }

    /// Id the next call to [`allocate`](Self::allocate) would return for
    /// `class_id`, without consuming it.
    pub fn peek(&self, class_id: i32) -> Result<u64> {
        let last = if self.per_class {
            self.class_counters.get(&class_id).copied().unwrap_or(self.floor)
        } else {
            self.global
        };
        last.checked_add(1).ok_or(TrackerError::IdSpaceExhausted)
    }

    pub fn allocate(&mut self, class_id: i32) -> Result<u64> {
        let id = self.peek(class_id)?;
        if self.per_class {
            self.class_counters.insert(class_id, id);
        } else {
            self.global = id;
        }
        Ok(id)
    }

    /// Restarts every sequence at 1.
    pub fn reset(&mut self) {
        self.global = 0;
        self.floor = 0;
        self.class_counters.clear();
    }

    #[cfg(test)]
    pub(crate) fn set_last(&mut self, class_id: i32, last: u64) {
        if self.per_class {
            self.class_counters.insert(class_id, last);
        } else {
            self.global = last;
        }
    }
}
