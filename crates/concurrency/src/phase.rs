//! Per-request commit state machine
//!
//! State transitions:
//! - `Received` → `Checking` (validation passed, conflict check begins)
//! - `Received` → `Rejected` (malformed request, no decision taken)
//! - `Checking` → `Committed` (no conflict, commit timestamp assigned)
//! - `Checking` → `Aborted` (write-write conflict)
//! - `Committed` | `Aborted` → `Replied` (response handed to the transport)
//!
//! A decision is never revisited: once `Committed` or `Aborted`, the only
//! legal move is to `Replied`, which keeps the decision.

use crate::error::CommitError;
use tso_core::{CommitRequest, RequestId, Response, Timestamp, WriteSet};

/// Phase of a commit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    /// Request decoded, not yet validated
    Received,
    /// Conflict check in progress
    Checking,
    /// Transaction committed
    Committed {
        /// Assigned commit timestamp
        commit_timestamp: Timestamp,
        /// Answer to a repeated request, not a fresh decision
        requires_heuristic_action: bool,
    },
    /// Transaction aborted
    Aborted,
    /// Request rejected before any decision
    Rejected,
    /// Response handed to the transport
    Replied {
        /// Commit timestamp if the decision was a commit
        commit_timestamp: Option<Timestamp>,
    },
}

impl CommitPhase {
    /// Name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            CommitPhase::Received => "Received",
            CommitPhase::Checking => "Checking",
            CommitPhase::Committed { .. } => "Committed",
            CommitPhase::Aborted => "Aborted",
            CommitPhase::Rejected => "Rejected",
            CommitPhase::Replied { .. } => "Replied",
        }
    }

    /// Check if a decision has been made
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            CommitPhase::Committed { .. } | CommitPhase::Aborted | CommitPhase::Replied { .. }
        )
    }
}

/// Server-side record of one commit request
///
/// Created when the request arrives and dropped once the response is handed
/// to the transport. Never persisted.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    /// Correlation identifier from the client
    pub request_id: RequestId,
    /// Start timestamp of the transaction
    pub start_timestamp: Timestamp,
    /// Cells the transaction modifies
    pub write_set: WriteSet,
    /// Whether the client accepts heuristic answers to repeats
    pub allow_heuristic_decision: bool,
    phase: CommitPhase,
}

impl CommitRecord {
    /// Record a freshly received request
    pub fn new(request_id: RequestId, request: CommitRequest) -> Self {
        CommitRecord {
            request_id,
            start_timestamp: request.start_timestamp,
            write_set: request.write_set,
            allow_heuristic_decision: request.allow_heuristic_decision,
            phase: CommitPhase::Received,
        }
    }

    /// Current phase
    pub fn phase(&self) -> CommitPhase {
        self.phase
    }

    /// `Received` → `Checking`
    pub fn begin_checking(&mut self) -> Result<(), CommitError> {
        self.transition(CommitPhase::Checking, |p| {
            matches!(p, CommitPhase::Received)
        })
    }

    /// `Received` → `Rejected`
    pub fn reject(&mut self) -> Result<(), CommitError> {
        self.transition(CommitPhase::Rejected, |p| {
            matches!(p, CommitPhase::Received)
        })
    }

    /// `Checking` → `Committed`
    pub fn mark_committed(
        &mut self,
        commit_timestamp: Timestamp,
        requires_heuristic_action: bool,
    ) -> Result<(), CommitError> {
        self.transition(
            CommitPhase::Committed {
                commit_timestamp,
                requires_heuristic_action,
            },
            |p| matches!(p, CommitPhase::Checking),
        )
    }

    /// `Checking` → `Aborted`
    pub fn mark_aborted(&mut self) -> Result<(), CommitError> {
        self.transition(CommitPhase::Aborted, |p| {
            matches!(p, CommitPhase::Checking)
        })
    }

    /// `Committed` | `Aborted` → `Replied`
    pub fn mark_replied(&mut self) -> Result<(), CommitError> {
        let commit_timestamp = match self.phase {
            CommitPhase::Committed {
                commit_timestamp, ..
            } => Some(commit_timestamp),
            _ => None,
        };
        self.transition(CommitPhase::Replied { commit_timestamp }, |p| {
            matches!(p, CommitPhase::Committed { .. } | CommitPhase::Aborted)
        })
    }

    /// Response for a decided record
    ///
    /// Returns `None` until a decision has been made.
    pub fn response(&self) -> Option<Response> {
        match self.phase {
            CommitPhase::Committed {
                commit_timestamp,
                requires_heuristic_action,
            } => Some(Response::Commit {
                requires_heuristic_action,
                start_timestamp: self.start_timestamp,
                commit_timestamp,
            }),
            CommitPhase::Aborted => Some(Response::Abort {
                start_timestamp: self.start_timestamp,
            }),
            _ => None,
        }
    }

    fn transition(
        &mut self,
        to: CommitPhase,
        allowed: impl FnOnce(&CommitPhase) -> bool,
    ) -> Result<(), CommitError> {
        if !allowed(&self.phase) {
            return Err(CommitError::InvalidTransition {
                from: self.phase.name(),
                to: to.name(),
            });
        }
        self.phase = to;
        Ok(())
    }
}
