//! Request and response messages exchanged between client and oracle
//!
//! Every request travels in a [`RequestEnvelope`] carrying the client's
//! [`RequestId`]; the server echoes that identifier in the matching
//! [`ResponseEnvelope`]. Responses may arrive in any order.

use crate::types::{RequestId, Timestamp, WriteSet};
use serde::{Deserialize, Serialize};

/// Commit request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Start timestamp of the committing transaction
    pub start_timestamp: Timestamp,
    /// Cells the transaction modifies
    pub write_set: WriteSet,
    /// Allow the server to answer a duplicate commit of an already committed
    /// transaction with its original decision, flagged as requiring
    /// heuristic action, instead of re-running the conflict check
    pub allow_heuristic_decision: bool,
}

impl CommitRequest {
    /// Commit request without heuristic options
    pub fn new(start_timestamp: Timestamp, write_set: WriteSet) -> Self {
        Self {
            start_timestamp,
            write_set,
            allow_heuristic_decision: false,
        }
    }
}

/// Request kinds understood by the oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Grant a fresh start timestamp
    Timestamp,
    /// Decide a transaction
    Commit(CommitRequest),
}

impl Request {
    /// Short name for logging
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Timestamp => RequestKind::Timestamp,
            Request::Commit(_) => RequestKind::Commit,
        }
    }
}

/// Discriminant of [`Request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Timestamp grant
    Timestamp,
    /// Commit decision
    Commit,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Timestamp => write!(f, "timestamp"),
            RequestKind::Commit => write!(f, "commit"),
        }
    }
}

/// Oracle responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Start timestamp granted
    Timestamp {
        /// Granted timestamp
        timestamp: Timestamp,
    },
    /// Transaction committed
    Commit {
        /// The server cannot vouch that the client observed this decision
        /// through earlier deliveries; the caller must reconcile manually
        requires_heuristic_action: bool,
        /// Start timestamp of the transaction
        start_timestamp: Timestamp,
        /// Assigned commit timestamp
        commit_timestamp: Timestamp,
    },
    /// Transaction aborted on a write-write conflict
    Abort {
        /// Start timestamp of the transaction
        start_timestamp: Timestamp,
    },
    /// Request rejected before any decision was taken
    Rejected {
        /// Human-readable reason
        reason: String,
    },
}

/// A request tagged with its correlation identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation identifier
    pub request_id: RequestId,
    /// Payload
    pub request: Request,
}

impl RequestEnvelope {
    /// Wrap a request
    pub fn new(request_id: RequestId, request: Request) -> Self {
        Self {
            request_id,
            request,
        }
    }
}

/// A response tagged with the identifier of the request it answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Identifier copied from the request
    pub request_id: RequestId,
    /// Payload
    pub response: Response,
}

impl ResponseEnvelope {
    /// Wrap a response
    pub fn new(request_id: RequestId, response: Response) -> Self {
        Self {
            request_id,
            response,
        }
    }
}
