//! Timestamp oracle client
//!
//! ## Failure semantics
//!
//! | Situation | Timestamp request | Commit request |
//! |-----------|-------------------|----------------|
//! | No connection, reconnect fails | `Connectivity` | `Connectivity` |
//! | Frame not handed to the connection | `Connectivity` | `Connectivity` |
//! | Connection lost while outstanding | retried | `Heuristic` |
//! | Deadline passed | retried, then `Timeout` | `Heuristic` |
//! | `Commit` flagged by the server | - | `Heuristic` |
//!
//! Commit requests are sent exactly once. A commit whose outcome is unknown
//! is surfaced as [`ClientError::Heuristic`] and never resent.
//!
//! Dropping a request future removes its pending entry; a response arriving
//! later is discarded. The server-side decision, if any, stands.

use crate::config::{ClientConfig, ConfigError};
use crate::connection::Connection;
use crate::error::{ClientError, HeuristicCause};
use crate::pending::{Outcome, PendingRequestStore, PendingStats};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use tso_core::{CommitRequest, Request, RequestEnvelope, RequestId, Response, Timestamp, WriteSet};
use tso_wire::encode_frame;

/// Options of a single commit request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Let the server answer a repeated commit of an already committed
    /// transaction with its original decision, flagged as heuristic
    pub allow_heuristic_decision: bool,
}

/// Drops the pending entry when the awaiting future is dropped
///
/// A no-op once the entry was resolved.
struct PendingGuard<'a> {
    store: &'a PendingRequestStore,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.store.cancel(self.request_id) {
            debug!(request_id = %self.request_id, "Pending request abandoned by caller");
        }
    }
}

enum Resolution {
    Outcome(Outcome),
    TimedOut,
}

struct Inner {
    config: ClientConfig,
    store: Arc<PendingRequestStore>,
    connection: Mutex<Option<Arc<Connection>>>,
    generation: AtomicU64,
    closed: AtomicBool,
}

/// Client of the timestamp oracle
///
/// Cheap to clone; clones share one connection and one pending store, so
/// concurrent requests are multiplexed.
#[derive(Clone)]
pub struct TsoClient {
    inner: Arc<Inner>,
}

impl TsoClient {
    /// Create a client that connects on first use
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(TsoClient {
            inner: Arc::new(Inner {
                config,
                store: Arc::new(PendingRequestStore::new()),
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Create a client and establish its connection
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Self::new(config).map_err(|e| ClientError::Config(e.to_string()))?;
        client.connection().await?;
        Ok(client)
    }

    /// Obtain a fresh start timestamp
    ///
    /// Retried under the configured [`RetryPolicy`](crate::RetryPolicy) on
    /// connectivity loss and timeouts.
    pub async fn new_start_timestamp(&self) -> Result<Timestamp, ClientError> {
        let retry = self.inner.config.retry;
        let mut attempt = 1;
        loop {
            match self.request_timestamp().await {
                Ok(ts) => return Ok(ts),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let backoff = retry.backoff(attempt);
                    debug!(attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "Retrying timestamp request");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Commit the transaction started at `start_timestamp`
    ///
    /// Returns the commit timestamp.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Aborted`]: write-write conflict, retry the transaction
    /// - [`ClientError::Heuristic`]: outcome unknown, reconcile out of band
    /// - [`ClientError::Connectivity`]: the request was never sent
    pub async fn commit(
        &self,
        start_timestamp: Timestamp,
        write_set: WriteSet,
    ) -> Result<Timestamp, ClientError> {
        self.commit_with(start_timestamp, write_set, CommitOptions::default())
            .await
    }

    /// Commit with explicit [`CommitOptions`]
    pub async fn commit_with(
        &self,
        start_timestamp: Timestamp,
        write_set: WriteSet,
        options: CommitOptions,
    ) -> Result<Timestamp, ClientError> {
        let request = Request::Commit(CommitRequest {
            start_timestamp,
            write_set,
            allow_heuristic_decision: options.allow_heuristic_decision,
        });

        let heuristic = |cause: HeuristicCause| {
            warn!(start_ts = %start_timestamp, %cause, "Commit outcome unknown");
            Err(ClientError::Heuristic {
                start_timestamp,
                cause,
            })
        };

        match self.roundtrip(request).await? {
            Resolution::Outcome(Outcome::Response(response)) => match response {
                Response::Commit {
                    requires_heuristic_action: false,
                    start_timestamp: echoed,
                    commit_timestamp,
                } if echoed == start_timestamp => Ok(commit_timestamp),
                Response::Commit {
                    requires_heuristic_action: true,
                    ..
                } => heuristic(HeuristicCause::ServerFlagged),
                Response::Abort { .. } => {
                    debug!(start_ts = %start_timestamp, "Commit aborted");
                    Err(ClientError::Aborted { start_timestamp })
                }
                Response::Rejected { reason } => Err(ClientError::Rejected(reason)),
                other => {
                    warn!(start_ts = %start_timestamp, response = ?other, "Unexpected response to commit");
                    heuristic(HeuristicCause::UnexpectedResponse)
                }
            },
            Resolution::Outcome(Outcome::ConnectionLost) => heuristic(HeuristicCause::ConnectionLost),
            Resolution::TimedOut => heuristic(HeuristicCause::Timeout),
        }
    }

    /// Close the connection
    ///
    /// Outstanding commits resolve as heuristic; later requests fail with
    /// [`ClientError::Closed`].
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(connection) = self.inner.connection.lock().await.take() {
            connection.shutdown("client closed");
        }
    }

    /// Requests awaiting a response
    pub fn pending_count(&self) -> usize {
        self.inner.store.pending_count()
    }

    /// Pending store statistics
    pub fn stats(&self) -> &PendingStats {
        self.inner.store.stats()
    }

    /// Configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    async fn request_timestamp(&self) -> Result<Timestamp, ClientError> {
        match self.roundtrip(Request::Timestamp).await? {
            Resolution::Outcome(Outcome::Response(Response::Timestamp { timestamp })) => Ok(timestamp),
            Resolution::Outcome(Outcome::Response(Response::Rejected { reason })) => {
                Err(ClientError::Rejected(reason))
            }
            Resolution::Outcome(Outcome::Response(other)) => Err(ClientError::Protocol(format!(
                "unexpected response to timestamp request: {:?}",
                other
            ))),
            Resolution::Outcome(Outcome::ConnectionLost) => Err(ClientError::Connectivity(
                "connection lost while awaiting timestamp".into(),
            )),
            Resolution::TimedOut => Err(ClientError::Timeout(
                self.inner.config.request_timeout.unwrap_or_default(),
            )),
        }
    }

    /// Current connection, reconnecting once if it was lost
    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let mut slot = self.inner.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_alive() {
                return Ok(Arc::clone(connection));
            }
        }
        if let Some(dead) = slot.take() {
            dead.shutdown("replaced");
        }
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let config = &self.inner.config;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let connection = Arc::new(
            Connection::connect(
                &config.addr(),
                config.connect_timeout,
                config.max_frame_size,
                Arc::clone(&self.inner.store),
                generation,
            )
            .await?,
        );
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Send `request` once and wait for its resolution
    ///
    /// An `Err` means the request never left the client.
    async fn roundtrip(&self, request: Request) -> Result<Resolution, ClientError> {
        let connection = self.connection().await?;
        let store = &self.inner.store;
        let (request_id, mut rx) = store.register(request.kind(), connection.generation());
        let _guard = PendingGuard {
            store: store.as_ref(),
            request_id,
        };

        // Registered before this check, so a concurrent loss either shows
        // here or finds the entry when failing the generation
        if !connection.is_alive() {
            if store.cancel(request_id) {
                return Err(ClientError::Connectivity("connection lost".into()));
            }
            return Ok(Resolution::Outcome(rx.await.map_err(|_| ClientError::Closed)?));
        }

        let frame = match encode_frame(
            &RequestEnvelope::new(request_id, request),
            self.inner.config.max_frame_size,
        ) {
            Ok(frame) => frame,
            Err(e) => {
                store.cancel(request_id);
                return Err(ClientError::Protocol(e.to_string()));
            }
        };
        if let Err(e) = connection.send(frame) {
            if store.cancel(request_id) {
                return Err(e);
            }
        }
        drop(connection);

        let outcome = match self.inner.config.request_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, &mut rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if store.expire(request_id) {
                        return Ok(Resolution::TimedOut);
                    }
                    rx.await
                }
            },
            None => rx.await,
        };
        outcome.map(Resolution::Outcome).map_err(|_| ClientError::Closed)
    }
}
