//! Server errors

use crate::config::ConfigError;
use thiserror::Error;
use tso_concurrency::CommitError;
use tso_durability::DurabilityError;

/// Errors that stop the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Timestamp log could not be opened
    #[error("durability error: {0}")]
    Durability(#[from] DurabilityError),

    /// Listener failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The commit path failed fatally; no further timestamps are issued
    #[error("server halted: {0}")]
    Halted(CommitError),
}
