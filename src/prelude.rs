//! Convenient imports
//!
//! ```ignore
//! use tso::prelude::*;
//!
//! let client = TsoClient::connect(ClientConfig::default()).await?;
//! let start = client.new_start_timestamp().await?;
//! ```

pub use crate::error::{Error, Result};

pub use tso_client::{ClientConfig, ClientError, CommitOptions, RetryPolicy, TsoClient};
pub use tso_concurrency::{CommitListener, CommitManager, ManagerOptions, TimestampOracle};
pub use tso_core::{CellId, Timestamp, WriteSet};
pub use tso_durability::DurabilityMode;
pub use tso_server::{ServerConfig, TsoServer};
