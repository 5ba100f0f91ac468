//! Pending request store
//!
//! Maps request identifiers to the callers awaiting their responses over a
//! shared connection.
//!
//! Flow:
//! 1. The client calls `register()` and gets an identifier and a receiver
//! 2. The request is framed with that identifier and queued to the writer
//! 3. The connection reader calls `complete()` for every response
//! 4. Connection loss calls `fail_connection()` for its generation
//! 5. A caller whose deadline passed calls `expire()`
//!
//! Every path resolves an entry by removing it from the map first, so each
//! receiver gets at most one outcome and no outcome reaches the wrong caller.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use tso_core::{RequestId, RequestKind, Response};

/// What a pending request resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The server answered
    Response(Response),
    /// The connection carrying the request was lost first
    ConnectionLost,
}

/// A request waiting for its response
struct PendingRequest {
    sender: oneshot::Sender<Outcome>,
    kind: RequestKind,
    generation: u64,
    created_at: Instant,
}

/// Statistics for the pending request store
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Requests registered
    pub total_registered: AtomicU64,
    /// Requests answered by the server
    pub total_completed: AtomicU64,
    /// Requests resolved by connection loss
    pub total_connection_lost: AtomicU64,
    /// Requests whose deadline passed
    pub total_timeouts: AtomicU64,
    /// Requests abandoned by their caller
    pub total_cancelled: AtomicU64,
    /// Responses for unknown identifiers
    pub total_unknown: AtomicU64,
}

/// Pending request store
#[derive(Default)]
pub struct PendingRequestStore {
    pending: DashMap<RequestId, PendingRequest>,
    next_id: AtomicU64,
    stats: PendingStats,
}

impl PendingRequestStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request sent on connection `generation`
    pub fn register(
        &self,
        kind: RequestKind,
        generation: u64,
    ) -> (RequestId, oneshot::Receiver<Outcome>) {
        let request_id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, receiver) = oneshot::channel();

        self.pending.insert(
            request_id,
            PendingRequest {
                sender,
                kind,
                generation,
                created_at: Instant::now(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);

        debug!(request_id = %request_id, kind = %kind, generation, "Registered pending request");
        (request_id, receiver)
    }

    /// Resolve a request with the server's response
    ///
    /// Returns `false` if the identifier is unknown, already resolved, or its
    /// caller is gone.
    pub fn complete(&self, request_id: RequestId, response: Response) -> bool {
        let Some((_, pending)) = self.pending.remove(&request_id) else {
            self.stats.total_unknown.fetch_add(1, Ordering::Relaxed);
            warn!(request_id = %request_id, "Response for unknown or resolved request");
            return false;
        };

        let elapsed = pending.created_at.elapsed();
        if pending.sender.send(Outcome::Response(response)).is_err() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %request_id, kind = %pending.kind, "Pending request receiver dropped");
            return false;
        }

        self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = %request_id,
            kind = %pending.kind,
            response_time_us = elapsed.as_micros() as u64,
            "Completed pending request"
        );
        true
    }

    /// Resolve every request sent on connection `generation` as lost
    ///
    /// Returns the number of requests resolved. Safe to call repeatedly.
    pub fn fail_connection(&self, generation: u64) -> usize {
        let ids: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().generation == generation)
            .map(|entry| *entry.key())
            .collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                if pending.kind == RequestKind::Commit {
                    warn!(request_id = %id, generation, "Commit outstanding on lost connection, outcome unknown");
                }
                let _ = pending.sender.send(Outcome::ConnectionLost);
                self.stats
                    .total_connection_lost
                    .fetch_add(1, Ordering::Relaxed);
                failed += 1;
            }
        }
        failed
    }

    /// Drop a request whose deadline passed
    ///
    /// Returns `true` if the request was still pending; the caller then owns
    /// its resolution. `false` means another path resolved it first and its
    /// receiver holds (or is about to hold) that outcome.
    pub fn expire(&self, request_id: RequestId) -> bool {
        match self.pending.remove(&request_id) {
            Some((_, pending)) => {
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %request_id,
                    kind = %pending.kind,
                    elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
                    "Pending request timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Drop a request that was never handed to the connection
    pub fn cancel(&self, request_id: RequestId) -> bool {
        if self.pending.remove(&request_id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Number of unresolved requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a request is unresolved
    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.pending.contains_key(&request_id)
    }

    /// Statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}
