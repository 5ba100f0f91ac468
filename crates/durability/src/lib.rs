//! Durability layer for the timestamp oracle
//!
//! This crate persists the oracle's high-water mark:
//! - DurabilityMode: None, Strict, Batched
//! - TimestampLog: append-only reservation records with CRC32 checksums
//! - Recovery: resume point computation tolerant of torn tails

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod mode;
pub mod timestamp_log;

pub use mode::DurabilityMode;
pub use timestamp_log::{DurabilityError, LogRecovery, Reservation, TimestampLog};
