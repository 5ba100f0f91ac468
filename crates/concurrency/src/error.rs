//! Error types for the commit path

use thiserror::Error;

/// Errors raised by the timestamp oracle
///
/// Every variant is fatal: once returned, the oracle refuses all further
/// requests with the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// The 64-bit timestamp space is used up
    #[error("timestamp space exhausted")]
    Exhausted,

    /// A reservation could not be made durable
    #[error("failed to persist timestamp reservation: {0}")]
    Durability(String),
}

/// Errors raised while deciding a commit request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    /// Timestamp allocation failed; nothing was recorded
    #[error("oracle failure: {0}")]
    Oracle(#[from] OracleError),

    /// A commit record was driven through an illegal phase change
    #[error("invalid commit phase transition from {from} to {to}")]
    InvalidTransition {
        /// Phase the record was in
        from: &'static str,
        /// Phase that was requested
        to: &'static str,
    },
}

impl CommitError {
    /// Check if this error halts the server
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommitError::Oracle(_))
    }
}
