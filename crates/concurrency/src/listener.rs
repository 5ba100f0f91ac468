//! Commit listeners
//!
//! Listeners are invoked by the commit manager once a committed decision has
//! been handed to the transport. Aborts, rejections and heuristic answers to
//! repeated requests never reach a listener.

use tso_core::{Timestamp, WriteSet};

/// A transaction whose commit was replied
#[derive(Debug, Clone, Copy)]
pub struct CommitEvent<'a> {
    /// Start timestamp
    pub start_timestamp: Timestamp,
    /// Commit timestamp
    pub commit_timestamp: Timestamp,
    /// Cells written
    pub write_set: &'a WriteSet,
}

/// Receives replied commits
///
/// Called on the thread that replied, after the commit lock was released.
/// Implementations must not block.
pub trait CommitListener: Send + Sync {
    /// Handle one replied commit
    fn on_commit(&self, event: &CommitEvent<'_>);
}
