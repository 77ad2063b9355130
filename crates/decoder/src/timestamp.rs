//! Outstanding input timestamps, handed back smallest first.
//!
//! With timestamp reordering on, decode order input stamps are collected
//! here and each filled output frame takes the smallest one still pending,
//! which restores presentation order for streams with B-frames.

use vdec_common::{Timestamp, MAX_BUFFERS_PER_PORT};

#[derive(Clone, Debug, Default)]
pub struct TimestampList {
    entries: Vec<Timestamp>,
}

impl TimestampList {
    pub const CAPACITY: usize = MAX_BUFFERS_PER_PORT;

    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(Self::CAPACITY),
        }
    }

    /// Record a timestamp. Returns `false` if the list is full.
    pub fn insert(&mut self, ts: Timestamp) -> bool {
        if self.entries.len() >= Self::CAPACITY {
            return false;
        }
        self.entries.push(ts);
        true
    }

    pub fn pop_min(&mut self) -> Option<Timestamp> {
        let (idx, _) = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, ts)| **ts)?;
        Some(self.entries.swap_remove(idx))
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
