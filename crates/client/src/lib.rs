//! Timestamp oracle client
//!
//! Multiplexes timestamp and commit requests over one connection and
//! correlates responses by request identifier. Connection loss and timeouts
//! never turn into a guessed commit or abort: outstanding commits resolve as
//! [`ClientError::Heuristic`], timestamp requests are retried.
//!
//! ```no_run
//! # async fn demo() -> Result<(), tso_client::ClientError> {
//! use tso_client::{ClientConfig, TsoClient};
//! use tso_core::{CellId, WriteSet};
//!
//! let client = TsoClient::connect(ClientConfig::default()).await?;
//! let start = client.new_start_timestamp().await?;
//!
//! let mut writes = WriteSet::new();
//! writes.insert(CellId::new("users", "row-1", "cf", "name"));
//! match client.commit(start, writes).await {
//!     Ok(commit) => println!("committed at {}", commit),
//!     Err(e) if e.is_abort() => println!("conflict, retry the transaction"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
mod connection;
pub mod config;
pub mod error;
pub mod pending;

pub use client::{CommitOptions, TsoClient};
pub use config::{ClientConfig, ClientConfigBuilder, ConfigError, RetryPolicy, DEFAULT_PORT};
pub use error::{ClientError, HeuristicCause};
pub use pending::{Outcome, PendingRequestStore, PendingStats};
