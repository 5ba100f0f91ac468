//! Unified error type
//!
//! Wraps the errors of the individual crates so applications using the
//! facade handle a single type.

use thiserror::Error;
use tso_client::{ClientError, HeuristicCause};
use tso_concurrency::{CommitError, OracleError};
use tso_core::Timestamp;
use tso_durability::DurabilityError;
use tso_server::ServerError;
use tso_wire::CodecError;

/// All TSO errors
#[derive(Debug, Error)]
pub enum Error {
    /// The transaction lost a write-write conflict
    #[error("transaction {start_timestamp} aborted")]
    Aborted {
        /// Start timestamp of the transaction
        start_timestamp: Timestamp,
    },

    /// The outcome of a commit is unknown and must be reconciled out of band
    #[error("outcome of transaction {start_timestamp} is unknown: {cause}")]
    Heuristic {
        /// Start timestamp of the transaction
        start_timestamp: Timestamp,
        /// What made the outcome ambiguous
        cause: HeuristicCause,
    },

    /// The oracle can not issue timestamps any more
    #[error("oracle halted: {0}")]
    Oracle(#[from] OracleError),

    /// Commit path failure
    #[error("commit error: {0}")]
    Commit(CommitError),

    /// Durability layer failure
    #[error("durability error: {0}")]
    Durability(#[from] DurabilityError),

    /// Frame encoding or decoding failure
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server failure
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Client failure other than abort and heuristic outcomes
    #[error(transparent)]
    Client(ClientError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for TSO operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if the failed operation may succeed when retried
    ///
    /// Aborts are retryable by starting the transaction again. Heuristic
    /// outcomes never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Aborted { .. } => true,
            Error::Client(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if this is a write-write conflict abort
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// Check if the commit outcome is unknown
    pub fn is_heuristic(&self) -> bool {
        matches!(self, Error::Heuristic { .. })
    }

    /// Check if the oracle stopped issuing timestamps
    pub fn is_halted(&self) -> bool {
        match self {
            Error::Oracle(_) => true,
            Error::Commit(e) => e.is_fatal(),
            Error::Server(ServerError::Halted(_)) => true,
            _ => false,
        }
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Aborted { start_timestamp } => Error::Aborted { start_timestamp },
            ClientError::Heuristic {
                start_timestamp,
                cause,
            } => Error::Heuristic {
                start_timestamp,
                cause,
            },
            ClientError::Config(msg) => Error::Config(msg),
            other => Error::Client(other),
        }
    }
}

impl From<CommitError> for Error {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::Oracle(oracle) => Error::Oracle(oracle),
            other => Error::Commit(other),
        }
    }
}

impl From<tso_client::ConfigError> for Error {
    fn from(e: tso_client::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tso_server::ConfigError> for Error {
    fn from(e: tso_server::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
