//! Client-raised outcomes

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tso_core::Timestamp;

/// Why the fate of a commit is unknown to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicCause {
    /// Connection lost while the commit was outstanding
    ConnectionLost,
    /// No response before the request deadline
    Timeout,
    /// The server answered but flagged the decision as requiring heuristic
    /// action
    ServerFlagged,
    /// The server answered with something that is not a commit decision
    UnexpectedResponse,
}

impl fmt::Display for HeuristicCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeuristicCause::ConnectionLost => write!(f, "connection lost"),
            HeuristicCause::Timeout => write!(f, "request timed out"),
            HeuristicCause::ServerFlagged => write!(f, "server requires heuristic action"),
            HeuristicCause::UnexpectedResponse => write!(f, "unexpected response"),
        }
    }
}

/// Errors surfaced by [`TsoClient`](crate::TsoClient)
///
/// `Aborted` is an expected transactional outcome. `Heuristic` means the
/// transaction may or may not have committed and must be reconciled out of
/// band; it is never retried by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The server aborted the transaction on a write-write conflict
    #[error("transaction {start_timestamp} aborted")]
    Aborted {
        /// Start timestamp of the aborted transaction
        start_timestamp: Timestamp,
    },

    /// Outcome of the commit is unknown
    #[error("outcome of transaction {start_timestamp} is unknown: {cause}")]
    Heuristic {
        /// Start timestamp of the transaction
        start_timestamp: Timestamp,
        /// What made the outcome ambiguous
        cause: HeuristicCause,
    },

    /// No usable connection; the request was not sent
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// A timestamp request got no response in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server refused the request without deciding it
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The server answered with an unexpected message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client configuration is invalid
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The client was closed
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Check if the transaction was definitely aborted
    pub fn is_abort(&self) -> bool {
        matches!(self, ClientError::Aborted { .. })
    }

    /// Check if the outcome of a commit is unknown
    pub fn is_heuristic(&self) -> bool {
        matches!(self, ClientError::Heuristic { .. })
    }

    /// Check if the same request may safely be sent again
    ///
    /// Never true for commits: their ambiguous outcomes are heuristic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Connectivity(_) | ClientError::Timeout(_))
    }
}
