//! Core types for the timestamp oracle
//!
//! This module defines the fundamental types used throughout the system:
//! - [`Timestamp`]: Logical time issued by the oracle
//! - [`CellId`]: Identity of a mutable storage cell
//! - [`WriteSet`]: Set of cells a transaction intends to modify
//! - [`RequestId`]: Client-local identifier correlating requests and responses

use serde::{Deserialize, Serialize};
use std::collections::hash_set;
use std::collections::HashSet;
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// Logical timestamp issued by the oracle
///
/// Start timestamps and commit timestamps share the same numeric space and
/// ordering. The value `0` is never issued and stands for "no timestamp".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The reserved "no timestamp" value
    pub const ZERO: Timestamp = Timestamp(0);

    /// The largest representable timestamp
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Wrap a raw value
    pub const fn new(value: u64) -> Self {
        Timestamp(value)
    }

    /// Raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// True for the reserved zero value
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Next timestamp, or `None` when the space is exhausted
    pub fn checked_next(&self) -> Option<Timestamp> {
        self.0.checked_add(1).map(Timestamp)
    }

    /// Add `delta`, or `None` on overflow
    pub fn checked_add(&self, delta: u64) -> Option<Timestamp> {
        self.0.checked_add(delta).map(Timestamp)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single mutable cell in the storage backend
///
/// A cell is addressed by table, row key, column family and column qualifier.
/// All four components are opaque byte strings and equality is byte-wise.
///
/// # Examples
///
/// ```
/// use tso_core::types::CellId;
///
/// let a = CellId::new("users", "row-1", "cf", "name");
/// let b = CellId::new("users", "row-1", "cf", "name");
/// assert_eq!(a, b);
/// assert_eq!(a.fingerprint(), b.fingerprint());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    /// Table identifier
    pub table: Vec<u8>,
    /// Row key
    pub row: Vec<u8>,
    /// Column family
    pub family: Vec<u8>,
    /// Column qualifier
    pub qualifier: Vec<u8>,
}

impl CellId {
    /// Create a new cell identifier
    pub fn new(
        table: impl Into<Vec<u8>>,
        row: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            table: table.into(),
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Stable 64-bit fingerprint of the cell
    ///
    /// Components are length-prefixed before hashing so that
    /// `("ab", "c")` and `("a", "bc")` never share an encoding.
    /// The value is stable across processes and platforms.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh3::new();
        for part in [&self.table, &self.row, &self.family, &self.qualifier] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        hasher.digest()
    }
}

impl fmt::Display for CellId {
    /// Display in the format: table/row/family:qualifier
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            String::from_utf8_lossy(&self.table),
            String::from_utf8_lossy(&self.row),
            String::from_utf8_lossy(&self.family),
            String::from_utf8_lossy(&self.qualifier),
        )
    }
}

/// The set of cells a transaction intends to modify
///
/// Members are unique and order is irrelevant. An empty write set denotes a
/// read-only transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSet {
    cells: HashSet<CellId>,
}

impl WriteSet {
    /// Create an empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty write set with room for `capacity` cells
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: HashSet::with_capacity(capacity),
        }
    }

    /// Add a cell; returns false if it was already present
    pub fn insert(&mut self, cell: CellId) -> bool {
        self.cells.insert(cell)
    }

    /// Check membership
    pub fn contains(&self, cell: &CellId) -> bool {
        self.cells.contains(cell)
    }

    /// Number of distinct cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True for a read-only transaction
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate over the cells in unspecified order
    pub fn iter(&self) -> hash_set::Iter<'_, CellId> {
        self.cells.iter()
    }

    /// Stable 64-bit digest of the set's members
    ///
    /// xxh3 over the sorted cell fingerprints, so insertion order does not
    /// matter. Equal sets always share a digest.
    pub fn digest(&self) -> u64 {
        let mut fingerprints: Vec<u64> = self.cells.iter().map(CellId::fingerprint).collect();
        fingerprints.sort_unstable();

        let mut hasher = Xxh3::new();
        hasher.update(&(fingerprints.len() as u64).to_le_bytes());
        for fingerprint in fingerprints {
            hasher.update(&fingerprint.to_le_bytes());
        }
        hasher.digest()
    }
}

impl FromIterator<CellId> for WriteSet {
    fn from_iter<I: IntoIterator<Item = CellId>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

impl Extend<CellId> for WriteSet {
    fn extend<I: IntoIterator<Item = CellId>>(&mut self, iter: I) {
        self.cells.extend(iter)
    }
}

impl<'a> IntoIterator for &'a WriteSet {
    type Item = &'a CellId;
    type IntoIter = hash_set::Iter<'a, CellId>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.iter()
    }
}

impl IntoIterator for WriteSet {
    type Item = CellId;
    type IntoIter = hash_set::IntoIter<CellId>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.into_iter()
    }
}

/// Client-local request identifier
///
/// Unique among the requests issued by one client; carried in every request
/// and echoed in the matching response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw value
    pub const fn new(value: u64) -> Self {
        RequestId(value)
    }

    /// Raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
