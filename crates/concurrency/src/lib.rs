//! Commit path of the timestamp oracle service
//!
//! - [`TimestampOracle`]: strictly increasing, durably reserved timestamps
//! - [`CommitHistory`]: bounded write-write conflict detection
//! - [`CommitManager`]: per-request decision state machine and the single
//!   serialization point of the commit path
//! - [`CommitListener`]: hook for replied commits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decisions;
pub mod error;
pub mod history;
pub mod listener;
pub mod manager;
pub mod oracle;
pub mod phase;

pub use decisions::{DecisionLog, DEFAULT_DECISION_LOG_CAPACITY};
pub use error::{CommitError, OracleError};
pub use history::{CommitHistory, Conflict, ASSOCIATIVITY, DEFAULT_HISTORY_CAPACITY};
pub use listener::{CommitEvent, CommitListener};
pub use manager::{CommitManager, CommitStats, CommitStatsSnapshot, ManagerOptions};
pub use oracle::{TimestampOracle, DEFAULT_RESERVATION_WINDOW};
pub use phase::{CommitPhase, CommitRecord};
