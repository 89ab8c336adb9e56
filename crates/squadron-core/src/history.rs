//! Bounded FIFO history windows

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ordered window of the most recent `capacity` entries.
///
/// Entries are kept in arrival order; pushing into a full window evicts
/// the oldest entry. The window can never exceed its capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append one entry, returning the evicted entry if the window was full
    pub fn push(&mut self, entry: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(entry);
        }
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Shrink or grow the window; shrinking drops the oldest entries
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> History<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T: PartialEq> History<T> {
    /// Append a batch, skipping whatever part of it is already held.
    ///
    /// Backends re-send whole histories on every poll. Two shapes count as
    /// already held: the whole current window appearing inside the batch,
    /// or the batch starting with the current tail. Only entries past the
    /// match are appended. Returns the number of entries appended.
    ///
    /// Matching is by value, so a genuinely new entry equal to the current
    /// tail (say two identical readings stamped in the same second) is
    /// taken for a re-delivery and dropped when it arrives on its own. A
    /// batch that carries both copies keeps the second one.
    pub fn append_unseen(&mut self, batch: impl IntoIterator<Item = T>) -> usize {
        let batch: Vec<T> = batch.into_iter().collect();
        let seen = self.seen_prefix(&batch);
        let mut appended = 0;
        for entry in batch.into_iter().skip(seen) {
            self.push(entry);
            appended += 1;
        }
        appended
    }

    /// Length of the leading part of `batch` the window already covers
    fn seen_prefix(&self, batch: &[T]) -> usize {
        let len = self.entries.len();
        if len == 0 || batch.is_empty() {
            return 0;
        }

        if batch.len() >= len {
            let contained = (0..=batch.len() - len)
                .rev()
                .find(|&start| self.entries.iter().eq(batch[start..start + len].iter()));
            if let Some(start) = contained {
                return start + len;
            }
        }

        (1..=len.min(batch.len()))
            .rev()
            .find(|&k| self.entries.range(len - k..).eq(batch[..k].iter()))
            .unwrap_or(0)
    }
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

// ============================================================================
// TESTS
// ============================================================================
