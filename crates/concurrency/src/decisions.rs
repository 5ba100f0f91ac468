//! Recent commit decisions keyed by transaction identity
//!
//! Lets the manager answer a repeated commit request for a transaction that
//! already committed with the original commit timestamp instead of deciding
//! again. A transaction is identified by its start timestamp together with
//! the digest of its write set: distinct transactions may share a start
//! timestamp, and only an identical request is a repeat.
//!
//! Bounded FIFO; a forgotten decision falls back to the conflict check,
//! which aborts the repeat if it wrote anything.

use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tso_core::{Timestamp, WriteSet};

/// Default number of decisions remembered
pub const DEFAULT_DECISION_LOG_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DecisionKey {
    start: Timestamp,
    write_set: u64,
}

impl DecisionKey {
    fn of(start: Timestamp, write_set: &WriteSet) -> Self {
        DecisionKey {
            start,
            write_set: write_set.digest(),
        }
    }
}

/// Bounded map from (start timestamp, write set) to commit timestamp
#[derive(Debug, Default)]
pub struct DecisionLog {
    capacity: usize,
    order: VecDeque<DecisionKey>,
    commits: FxHashMap<DecisionKey, Timestamp>,
}

impl DecisionLog {
    /// Remember up to `capacity` decisions (zero disables the log)
    pub fn new(capacity: usize) -> Self {
        DecisionLog {
            capacity,
            order: VecDeque::with_capacity(capacity.min(1024)),
            commits: FxHashMap::default(),
        }
    }

    /// Remember that the transaction (`start`, `write_set`) committed at
    /// `commit`
    ///
    /// The first decision for a transaction is kept.
    pub fn insert(&mut self, start: Timestamp, write_set: &WriteSet, commit: Timestamp) {
        if self.capacity == 0 {
            return;
        }
        let key = DecisionKey::of(start, write_set);
        if self.commits.contains_key(&key) {
            return;
        }
        self.commits.insert(key, commit);
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.commits.remove(&oldest);
            }
        }
    }

    /// Commit timestamp of the transaction (`start`, `write_set`), if
    /// remembered
    pub fn get(&self, start: Timestamp, write_set: &WriteSet) -> Option<Timestamp> {
        self.commits
            .get(&DecisionKey::of(start, write_set))
            .copied()
    }

    /// Number of remembered decisions
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Check if nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}
