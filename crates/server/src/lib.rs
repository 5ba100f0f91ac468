//! Timestamp oracle server
//!
//! - [`TsoServer`]: tokio TCP server around a [`CommitManager`](tso_concurrency::CommitManager)
//! - [`ServerConfig`]: TOML configuration
//! - [`ObserverRegistry`]: interest-based notification of replied commits
//! - `ProgrammableServer`: scripted server for client tests (`test-util` feature)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod notify;
#[cfg(feature = "test-util")]
pub mod programmable;
pub mod server;

pub use config::{ConfigError, ServerConfig, DEFAULT_PORT};
pub use error::ServerError;
pub use notify::{Interest, Notification, ObserverRegistry};
#[cfg(feature = "test-util")]
pub use programmable::ProgrammableServer;
pub use server::{ShutdownHandle, TsoServer};
