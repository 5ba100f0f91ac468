//! Core types for the timestamp oracle
//!
//! This crate holds the data model shared by server and client:
//! - [`Timestamp`], [`CellId`], [`WriteSet`], [`RequestId`]
//! - Protocol messages ([`Request`], [`Response`] and their envelopes)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod protocol;
pub mod types;

pub use protocol::{
    CommitRequest, Request, RequestEnvelope, RequestKind, Response, ResponseEnvelope,
};
pub use types::{CellId, RequestId, Timestamp, WriteSet};
