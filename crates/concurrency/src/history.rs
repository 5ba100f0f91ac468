//! Bounded commit history for write-write conflict detection
//!
//! The history maps cells to the highest commit timestamp that wrote them.
//! A transaction may commit only if no cell of its write set was committed
//! after the transaction's start timestamp.
//!
//! # Design
//!
//! - Set-associative table: `capacity` slots in buckets of [`ASSOCIATIVITY`]
//! - Keyed by the cell's 64-bit fingerprint, never by the full cell id
//! - A full bucket displaces its oldest entry and raises the low watermark
//!
//! # Safety Under Eviction
//!
//! A cell without an entry is treated as committed at the low watermark, the
//! highest commit timestamp ever displaced. Fingerprint collisions merge two
//! cells into one entry holding the larger timestamp. Both approximations only
//! ever report a commit timestamp that is at least the true one, so a small
//! history causes spurious aborts but never lets a conflicting write commit.

use tso_core::{CellId, Timestamp, WriteSet};

/// Ways per bucket
pub const ASSOCIATIVITY: usize = 8;

/// Default number of cells retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    fingerprint: u64,
    // ZERO marks an empty slot; zero is never issued as a commit timestamp
    commit: Timestamp,
}

/// Why a transaction must abort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// First conflicting cell found
    pub cell: CellId,
    /// Commit timestamp the history reports for that cell
    pub committed_at: Timestamp,
    /// True if the cell had no entry and the low watermark decided
    pub from_low_watermark: bool,
}

/// Bounded record of recently committed cells
#[derive(Debug)]
pub struct CommitHistory {
    slots: Vec<Slot>,
    buckets: usize,
    low_watermark: Timestamp,
    len: usize,
}

impl CommitHistory {
    /// Create a history retaining roughly `capacity` cells
    ///
    /// Capacity is rounded up to a whole number of buckets.
    pub fn new(capacity: usize) -> Self {
        Self::with_low_watermark(capacity, Timestamp::ZERO)
    }

    /// Create a history that treats every unknown cell as committed at
    /// `low_watermark`
    ///
    /// Used after a restart: the previous history is lost, so every
    /// transaction that started before the restart must abort.
    pub fn with_low_watermark(capacity: usize, low_watermark: Timestamp) -> Self {
        let buckets = capacity.div_ceil(ASSOCIATIVITY).max(1);
        CommitHistory {
            slots: vec![Slot::default(); buckets * ASSOCIATIVITY],
            buckets,
            low_watermark,
            len: 0,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no cell has been recorded
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Highest commit timestamp displaced so far
    pub fn low_watermark(&self) -> Timestamp {
        self.low_watermark
    }

    /// Upper bound of the last commit timestamp of `cell`
    pub fn last_commit(&self, cell: &CellId) -> Timestamp {
        self.lookup(cell.fingerprint()).unwrap_or(self.low_watermark)
    }

    /// Find the first cell of `write_set` committed after `start`
    ///
    /// Returns `None` if the transaction may commit.
    pub fn check(&self, start: Timestamp, write_set: &WriteSet) -> Option<Conflict> {
        for cell in write_set {
            let (committed_at, from_low_watermark) = match self.lookup(cell.fingerprint()) {
                Some(commit) => (commit, false),
                None => (self.low_watermark, true),
            };
            if committed_at > start {
                return Some(Conflict {
                    cell: cell.clone(),
                    committed_at,
                    from_low_watermark,
                });
            }
        }
        None
    }

    /// Stamp every cell of `write_set` with `commit`
    ///
    /// Commit timestamps must be recorded in increasing order. Returns the
    /// number of entries displaced.
    pub fn record(&mut self, commit: Timestamp, write_set: &WriteSet) -> usize {
        debug_assert!(!commit.is_zero());
        let mut displaced = 0;
        for cell in write_set {
            if self.insert(cell.fingerprint(), commit) {
                displaced += 1;
            }
        }
        displaced
    }

    fn bucket(&self, fingerprint: u64) -> std::ops::Range<usize> {
        let start = (fingerprint % self.buckets as u64) as usize * ASSOCIATIVITY;
        start..start + ASSOCIATIVITY
    }

    fn lookup(&self, fingerprint: u64) -> Option<Timestamp> {
        self.slots[self.bucket(fingerprint)]
            .iter()
            .find(|slot| !slot.commit.is_zero() && slot.fingerprint == fingerprint)
            .map(|slot| slot.commit)
    }

    fn insert(&mut self, fingerprint: u64, commit: Timestamp) -> bool {
        let range = self.bucket(fingerprint);
        let bucket = &mut self.slots[range];

        if let Some(slot) = bucket
            .iter_mut()
            .find(|slot| !slot.commit.is_zero() && slot.fingerprint == fingerprint)
        {
            slot.commit = slot.commit.max(commit);
            return false;
        }

        if let Some(slot) = bucket.iter_mut().find(|slot| slot.commit.is_zero()) {
            *slot = Slot {
                fingerprint,
                commit,
            };
            self.len += 1;
            return false;
        }

        // Bucket full: displace the oldest entry
        let victim = (0..ASSOCIATIVITY)
            .min_by_key(|&i| bucket[i].commit)
            .unwrap_or(0);
        self.low_watermark = self.low_watermark.max(bucket[victim].commit);
        bucket[victim] = Slot {
            fingerprint,
            commit,
        };
        true
    }
}

impl Default for CommitHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
