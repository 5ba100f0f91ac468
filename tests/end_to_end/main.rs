//! End-to-end tests: real server, real client

#[path = "../common/mod.rs"]
mod common;

mod commit_protocol;
mod heuristics;
mod restart;
