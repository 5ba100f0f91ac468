//! Durability mode for high-water mark reservations.
//!
//! Defines when reservation records are fsynced to disk.

use serde::{Deserialize, Serialize};

/// Durability mode for reservation writes.
///
/// Controls when the high-water mark is fsynced and the trade-off between
/// reservation latency and the amount of timestamp space skipped on restart.
///
/// # Mode Comparison
///
/// | Mode | fsync | Restart behavior |
/// |------|-------|------------------|
/// | None | never | No persistence, timestamps restart from 1 |
/// | Strict | every reservation | Resume above the last synced mark |
/// | Batched | every N reservations or T ms | Resume above the last mark plus N windows |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DurabilityMode {
    /// No durability - the high-water mark lives in memory only.
    ///
    /// Timestamps are NOT unique across restarts in this mode.
    /// Use case: Tests, development.
    None,

    /// fsync after every reservation (slowest reservation, no skipped space).
    Strict,

    /// fsync every `batch_size` reservations OR when `interval_ms` elapsed
    /// since the last fsync, checked on append.
    ///
    /// Up to `batch_size - 1` reservations may be lost on crash. Recovery
    /// compensates by skipping `batch_size` reservation windows, so no
    /// timestamp is ever reissued; the cost is a gap in the timestamp space.
    Batched {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum reservations between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Check if this mode persists reservations at all.
    pub fn requires_log(&self) -> bool {
        !matches!(self, DurabilityMode::None)
    }

    /// Check if this mode requires fsync on every reservation.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Strict)
    }

    /// Timestamp space to skip on recovery for reservations of `window`
    /// timestamps that may have been acknowledged but not synced.
    pub fn recovery_skip(&self, window: u64) -> u64 {
        match self {
            DurabilityMode::None | DurabilityMode::Strict => 0,
            DurabilityMode::Batched { batch_size, .. } => {
                (*batch_size as u64).saturating_mul(window)
            }
        }
    }

    /// Human-readable description of the mode.
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::None => "No durability (timestamps restart on every launch)",
            DurabilityMode::Strict => "Sync fsync per reservation (no skipped space)",
            DurabilityMode::Batched { .. } => "Batched fsync (skips space on restart)",
        }
    }

    /// Create a batched mode with recommended defaults.
    ///
    /// Returns `Batched { interval_ms: 100, batch_size: 16 }`.
    pub fn buffered_default() -> Self {
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 16,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Strict
    }
}
