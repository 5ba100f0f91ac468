//! # TSO
//!
//! Centralized timestamp oracle and commit conflict arbiter for
//! snapshot-isolation transactions over a multi-version store.
//!
//! Clients take a start timestamp, buffer their writes, then ask the oracle
//! to commit the write set. The oracle commits only if no cell of the write
//! set was committed by another transaction after the start timestamp, and
//! hands back a commit timestamp from the same strictly increasing sequence.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tso::prelude::*;
//!
//! let server = TsoServer::bind(&ServerConfig::ephemeral()).await?;
//! let port = server.local_addr()?.port();
//! tokio::spawn(server.run());
//!
//! let client = TsoClient::connect(ClientConfig::builder().port(port).build()?).await?;
//! let start = client.new_start_timestamp().await?;
//! let writes: WriteSet = [CellId::new("t", "row", "cf", "q")].into_iter().collect();
//! let commit = client.commit(start, writes).await?;
//! ```
//!
//! ## Crates
//!
//! - [`types`]: timestamps, cells, write sets, protocol messages
//! - [`durability`]: durable high-water mark log
//! - [`concurrency`]: oracle, commit history, commit manager
//! - [`wire`]: frame codec
//! - [`server`]: TCP server, observer registry, programmable test server (`test-util`)
//! - [`client`]: request correlation with heuristic outcomes

#![warn(missing_docs)]

mod error;

pub mod prelude;

pub use error::{Error, Result};

pub use tso_client as client;
pub use tso_concurrency as concurrency;
pub use tso_core as types;
pub use tso_durability as durability;
pub use tso_server as server;
pub use tso_wire as wire;
