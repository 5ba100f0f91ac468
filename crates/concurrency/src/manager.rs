//! Commit decision engine
//!
//! Drives each commit request through its [`CommitPhase`] sequence and owns
//! the serialization point of the commit path.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. receive()         - CommitRecord in Received
//! 2. validate          - start timestamp non-zero and already issued,
//!                        otherwise Rejected
//! 3. begin_checking()  - Checking
//! 4. lock commit state
//! 5. decision log      - heuristic repeat answers with the original commit
//! 6. history.check()   - IF conflict: Aborted
//! 7. oracle.next()     - commit timestamp
//! 8. history.record()  - cells stamped before the lock is released
//! 9. unlock, reply
//! 10. replied()        - Replied, listeners notified for commits
//! ```
//!
//! Steps 5 through 8 happen under one lock, so no conflict check ever sees a
//! commit timestamp that is allocated but not yet recorded.

use crate::decisions::{DecisionLog, DEFAULT_DECISION_LOG_CAPACITY};
use crate::error::{CommitError, OracleError};
use crate::history::{CommitHistory, DEFAULT_HISTORY_CAPACITY};
use crate::listener::{CommitEvent, CommitListener};
use crate::oracle::TimestampOracle;
use crate::phase::{CommitPhase, CommitRecord};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};
use tso_core::{CommitRequest, RequestId, Response, Timestamp};

/// Sizing of the commit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    /// Cells retained by the conflict history
    pub history_capacity: usize,
    /// Commit decisions remembered for repeated requests
    pub decision_log_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            decision_log_capacity: DEFAULT_DECISION_LOG_CAPACITY,
        }
    }
}

struct CommitState {
    history: CommitHistory,
    decisions: DecisionLog,
}

/// Counters of commit outcomes
#[derive(Debug, Default)]
pub struct CommitStats {
    timestamps: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
    heuristic: AtomicU64,
    rejected: AtomicU64,
    displaced: AtomicU64,
}

/// Point-in-time copy of [`CommitStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStatsSnapshot {
    /// Start timestamps granted
    pub timestamps: u64,
    /// Fresh commits
    pub commits: u64,
    /// Aborts
    pub aborts: u64,
    /// Repeated requests answered from the decision log
    pub heuristic: u64,
    /// Requests rejected before a decision
    pub rejected: u64,
    /// History entries displaced
    pub displaced: u64,
}

impl CommitStats {
    /// Copy the current counters
    pub fn snapshot(&self) -> CommitStatsSnapshot {
        CommitStatsSnapshot {
            timestamps: self.timestamps.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            heuristic: self.heuristic.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            displaced: self.displaced.load(Ordering::Relaxed),
        }
    }
}

/// Decides commit requests
///
/// # Thread Safety
///
/// All methods take `&self`. Commit decisions are serialized by the commit
/// lock; timestamp requests only take the oracle's own lock and proceed
/// concurrently with commits. Lock order is commit lock, then oracle.
pub struct CommitManager {
    oracle: TimestampOracle,
    state: Mutex<CommitState>,
    listeners: RwLock<Vec<Arc<dyn CommitListener>>>,
    stats: CommitStats,
}

impl CommitManager {
    /// Create a manager around `oracle`
    ///
    /// The conflict history starts with its low watermark just below the
    /// oracle's epoch, so every transaction that started before a restart
    /// aborts if it wrote anything.
    pub fn new(oracle: TimestampOracle, options: ManagerOptions) -> Self {
        let low_watermark = Timestamp::new(oracle.epoch_start().as_u64().saturating_sub(1));
        CommitManager {
            state: Mutex::new(CommitState {
                history: CommitHistory::with_low_watermark(options.history_capacity, low_watermark),
                decisions: DecisionLog::new(options.decision_log_capacity),
            }),
            oracle,
            listeners: RwLock::new(Vec::new()),
            stats: CommitStats::default(),
        }
    }

    /// In-memory manager with default sizing
    pub fn ephemeral() -> Self {
        Self::new(TimestampOracle::ephemeral(), ManagerOptions::default())
    }

    /// Grant a start timestamp
    pub fn timestamp(&self) -> Result<Timestamp, OracleError> {
        let ts = self.oracle.next()?;
        self.stats.timestamps.fetch_add(1, Ordering::Relaxed);
        trace!(ts = %ts, "Granted timestamp");
        Ok(ts)
    }

    /// Record an incoming commit request
    pub fn receive(&self, request_id: RequestId, request: CommitRequest) -> CommitRecord {
        debug!(
            request_id = %request_id,
            start_ts = %request.start_timestamp,
            cells = request.write_set.len(),
            "Commit request received"
        );
        CommitRecord::new(request_id, request)
    }

    /// Decide a received commit request
    ///
    /// Returns the response to send. A request that fails validation is
    /// moved to `Rejected` and answered with [`Response::Rejected`].
    ///
    /// # Errors
    ///
    /// [`CommitError::Oracle`] if no commit timestamp could be allocated;
    /// nothing was recorded and the manager is halted.
    pub fn decide(&self, record: &mut CommitRecord) -> Result<Response, CommitError> {
        let start = record.start_timestamp;

        if let Some(reason) = self.validate(start) {
            record.reject()?;
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %record.request_id, start_ts = %start, %reason, "Commit request rejected");
            return Ok(Response::Rejected { reason });
        }

        record.begin_checking()?;

        {
            let mut state = self.state.lock();

            if record.allow_heuristic_decision {
                if let Some(commit) = state.decisions.get(start, &record.write_set) {
                    record.mark_committed(commit, true)?;
                    drop(state);
                    self.stats.heuristic.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        request_id = %record.request_id,
                        start_ts = %start,
                        commit_ts = %commit,
                        "Repeated commit answered from decision log"
                    );
                    return self.response_of(record);
                }
            }

            if let Some(conflict) = state.history.check(start, &record.write_set) {
                record.mark_aborted()?;
                drop(state);
                self.stats.aborts.fetch_add(1, Ordering::Relaxed);
                debug!(
                    request_id = %record.request_id,
                    start_ts = %start,
                    cell = %conflict.cell,
                    committed_at = %conflict.committed_at,
                    from_low_watermark = conflict.from_low_watermark,
                    "Commit aborted on write-write conflict"
                );
                return self.response_of(record);
            }

            let commit = match self.oracle.next() {
                Ok(ts) => ts,
                Err(e) => {
                    error!(request_id = %record.request_id, start_ts = %start, error = %e, "Commit timestamp allocation failed");
                    return Err(e.into());
                }
            };

            let displaced = state.history.record(commit, &record.write_set);
            state.decisions.insert(start, &record.write_set, commit);
            record.mark_committed(commit, false)?;

            if displaced > 0 {
                self.stats
                    .displaced
                    .fetch_add(displaced as u64, Ordering::Relaxed);
                trace!(displaced, low_watermark = %state.history.low_watermark(), "History entries displaced");
            }
        }

        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        if let CommitPhase::Committed {
            commit_timestamp, ..
        } = record.phase()
        {
            debug!(request_id = %record.request_id, start_ts = %start, commit_ts = %commit_timestamp, "Commit decided");
        }
        self.response_of(record)
    }

    /// Mark a decided record as handed to the transport
    ///
    /// Listeners are notified for fresh commits only; aborts and heuristic
    /// answers to repeated requests are silent.
    pub fn replied(&self, record: &mut CommitRecord) -> Result<(), CommitError> {
        let notify = matches!(
            record.phase(),
            CommitPhase::Committed {
                requires_heuristic_action: false,
                ..
            }
        );
        record.mark_replied()?;

        if let (
            true,
            CommitPhase::Replied {
                commit_timestamp: Some(commit_timestamp),
            },
        ) = (notify, record.phase())
        {
            let event = CommitEvent {
                start_timestamp: record.start_timestamp,
                commit_timestamp,
                write_set: &record.write_set,
            };
            for listener in self.listeners.read().iter() {
                listener.on_commit(&event);
            }
        }
        Ok(())
    }

    /// Receive, decide and reply in one step
    ///
    /// For callers without a transport. A rejected request is returned as
    /// its response without reaching `Replied`.
    pub fn commit(&self, request: CommitRequest) -> Result<Response, CommitError> {
        let mut record = self.receive(RequestId::new(0), request);
        let response = self.decide(&mut record)?;
        if record.phase().is_decided() {
            self.replied(&mut record)?;
        }
        Ok(response)
    }

    /// Register a listener for replied commits
    pub fn add_listener(&self, listener: Arc<dyn CommitListener>) {
        self.listeners.write().push(listener);
    }

    /// Outcome counters
    pub fn stats(&self) -> CommitStatsSnapshot {
        self.stats.snapshot()
    }

    /// Underlying oracle
    pub fn oracle(&self) -> &TimestampOracle {
        &self.oracle
    }

    /// Check whether the oracle refuses further requests
    pub fn is_halted(&self) -> bool {
        self.oracle.is_halted()
    }

    /// Current low watermark of the conflict history
    pub fn low_watermark(&self) -> Timestamp {
        self.state.lock().history.low_watermark()
    }

    fn validate(&self, start: Timestamp) -> Option<String> {
        if start.is_zero() {
            return Some("start timestamp 0 was never issued".to_string());
        }
        let current = self.oracle.current();
        if start > current {
            return Some(format!(
                "start timestamp {} is above the last issued timestamp {}",
                start, current
            ));
        }
        None
    }

    fn response_of(&self, record: &CommitRecord) -> Result<Response, CommitError> {
        record.response().ok_or(CommitError::InvalidTransition {
            from: record.phase().name(),
            to: "Replied",
        })
    }
}

impl Default for CommitManager {
    fn default() -> Self {
        Self::ephemeral()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tso_core::{CellId, WriteSet};

    fn cell(row: &str) -> CellId {
        CellId::new("t", row, "f", "q")
    }

    fn ws(rows: &[&str]) -> WriteSet {
        rows.iter().map(|r| cell(r)).collect()
    }

    #[derive(Default)]
    struct Recorder(parking_lot::Mutex<Vec<(Timestamp, Timestamp)>>);

    impl CommitListener for Recorder {
        fn on_commit(&self, event: &CommitEvent<'_>) {
            self.0
                .lock()
                .push((event.start_timestamp, event.commit_timestamp));
        }
    }

    #[test]
    fn test_commit_then_stale_retry_aborts() {
        let manager = CommitManager::ephemeral();
        let start = manager.timestamp().unwrap();
        assert_eq!(start, Timestamp::new(1));

        let first = manager
            .commit(CommitRequest::new(start, ws(&["cellA"])))
            .unwrap();
        assert_eq!(
            first,
            Response::Commit {
                requires_heuristic_action: false,
                start_timestamp: Timestamp::new(1),
                commit_timestamp: Timestamp::new(2),
            }
        );

        let second = manager
            .commit(CommitRequest::new(start, ws(&["cellA"])))
            .unwrap();
        assert_eq!(
            second,
            Response::Abort {
                start_timestamp: Timestamp::new(1)
            }
        );

        let stats = manager.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.aborts, 1);
    }

    #[test]
    fn test_heuristic_repeat_returns_original_commit() {
        let manager = CommitManager::ephemeral();
        let start = manager.timestamp().unwrap();
        manager
            .commit(CommitRequest::new(start, ws(&["a"])))
            .unwrap();

        let mut repeat = CommitRequest::new(start, ws(&["a"]));
        repeat.allow_heuristic_decision = true;
        let response = manager.commit(repeat).unwrap();

        assert_eq!(
            response,
            Response::Commit {
                requires_heuristic_action: true,
                start_timestamp: start,
                commit_timestamp: Timestamp::new(2),
            }
        );
        assert_eq!(manager.stats().heuristic, 1);
        // No new timestamp was consumed
        assert_eq!(manager.oracle().current(), Timestamp::new(2));
    }

    #[test]
    fn test_same_start_disjoint_write_set_with_heuristic_flag_is_decided() {
        let manager = CommitManager::ephemeral();
        let start = manager.timestamp().unwrap();
        manager
            .commit(CommitRequest::new(start, ws(&["cellA"])))
            .unwrap();

        let mut other = CommitRequest::new(start, ws(&["cellB"]));
        other.allow_heuristic_decision = true;
        let response = manager.commit(other).unwrap();

        assert_eq!(
            response,
            Response::Commit {
                requires_heuristic_action: false,
                start_timestamp: start,
                commit_timestamp: Timestamp::new(3),
            }
        );
        assert_eq!(
            manager.state.lock().history.last_commit(&cell("cellB")),
            Timestamp::new(3)
        );
        let stats = manager.stats();
        assert_eq!(stats.commits, 2);
        assert_eq!(stats.heuristic, 0);
    }

    #[test]
    fn test_heuristic_repeats_of_same_start_transactions_keep_their_own_commit() {
        let manager = CommitManager::ephemeral();
        let start = manager.timestamp().unwrap();
        manager
            .commit(CommitRequest::new(start, ws(&["cellA"])))
            .unwrap();
        manager
            .commit(CommitRequest::new(start, ws(&["cellB"])))
            .unwrap();

        for (row, commit) in [("cellA", 2), ("cellB", 3)] {
            let mut repeat = CommitRequest::new(start, ws(&[row]));
            repeat.allow_heuristic_decision = true;
            assert_eq!(
                manager.commit(repeat).unwrap(),
                Response::Commit {
                    requires_heuristic_action: true,
                    start_timestamp: start,
                    commit_timestamp: Timestamp::new(commit),
                }
            );
        }

        // A request covering both cells was never decided as such
        let mut union = CommitRequest::new(start, ws(&["cellA", "cellB"]));
        union.allow_heuristic_decision = true;
        assert_eq!(
            manager.commit(union).unwrap(),
            Response::Abort {
                start_timestamp: start
            }
        );
        assert_eq!(manager.stats().heuristic, 2);
    }

    #[test]
    fn test_read_only_always_commits() {
        let manager = CommitManager::ephemeral();
        let t1 = manager.timestamp().unwrap();
        manager.commit(CommitRequest::new(t1, ws(&["a"]))).unwrap();

        let response = manager
            .commit(CommitRequest::new(t1, WriteSet::new()))
            .unwrap();
        assert!(matches!(response, Response::Commit { .. }));
    }

    #[test]
    fn test_first_committer_wins() {
        let manager = CommitManager::ephemeral();
        let t1 = manager.timestamp().unwrap();
        let t2 = manager.timestamp().unwrap();

        let r2 = manager.commit(CommitRequest::new(t2, ws(&["x"]))).unwrap();
        let r1 = manager.commit(CommitRequest::new(t1, ws(&["x"]))).unwrap();

        assert!(matches!(r2, Response::Commit { .. }));
        assert_eq!(r1, Response::Abort { start_timestamp: t1 });
    }

    #[test]
    fn test_commit_timestamp_exceeds_start() {
        let manager = CommitManager::ephemeral();
        let start = manager.timestamp().unwrap();
        manager.timestamp().unwrap();
        manager.timestamp().unwrap();

        match manager.commit(CommitRequest::new(start, ws(&["a"]))).unwrap() {
            Response::Commit {
                commit_timestamp, ..
            } => {
                assert!(commit_timestamp > start);
                assert_eq!(commit_timestamp, Timestamp::new(4));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unissued_start_is_rejected() {
        let manager = CommitManager::ephemeral();
        manager.timestamp().unwrap();

        let zero = manager
            .commit(CommitRequest::new(Timestamp::ZERO, ws(&["a"])))
            .unwrap();
        assert!(matches!(zero, Response::Rejected { .. }));

        let future = manager
            .commit(CommitRequest::new(Timestamp::new(50), ws(&["a"])))
            .unwrap();
        assert!(matches!(future, Response::Rejected { .. }));

        assert_eq!(manager.stats().rejected, 2);
        assert!(manager.state.lock().history.is_empty());
    }

    #[test]
    fn test_listeners_fire_only_after_replied_commit() {
        let manager = CommitManager::ephemeral();
        let recorder = Arc::new(Recorder::default());
        manager.add_listener(recorder.clone());

        let start = manager.timestamp().unwrap();
        let mut record = manager.receive(RequestId::new(7), CommitRequest::new(start, ws(&["a"])));
        manager.decide(&mut record).unwrap();
        assert!(recorder.0.lock().is_empty());

        manager.replied(&mut record).unwrap();
        assert_eq!(*recorder.0.lock(), vec![(start, Timestamp::new(2))]);

        // Abort: no notification
        let mut aborted = manager.receive(RequestId::new(8), CommitRequest::new(start, ws(&["a"])));
        manager.decide(&mut aborted).unwrap();
        manager.replied(&mut aborted).unwrap();

        // Heuristic repeat: no notification
        let mut repeat = CommitRequest::new(start, ws(&["a"]));
        repeat.allow_heuristic_decision = true;
        manager.commit(repeat).unwrap();

        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn test_replied_twice_is_invalid() {
        let manager = CommitManager::ephemeral();
        let start = manager.timestamp().unwrap();
        let mut record = manager.receive(RequestId::new(1), CommitRequest::new(start, ws(&["a"])));
        manager.decide(&mut record).unwrap();
        manager.replied(&mut record).unwrap();
        assert!(matches!(
            manager.replied(&mut record),
            Err(CommitError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_restart_aborts_transactions_from_previous_epoch() {
        let oracle = TimestampOracle::new(
            tso_durability::TimestampLog::ephemeral(),
            Timestamp::new(100),
            10,
        );
        let manager = CommitManager::new(oracle, ManagerOptions::default());
        assert_eq!(manager.low_watermark(), Timestamp::new(100));
        manager.timestamp().unwrap();

        let old = manager
            .commit(CommitRequest::new(Timestamp::new(50), ws(&["a"])))
            .unwrap();
        assert_eq!(
            old,
            Response::Abort {
                start_timestamp: Timestamp::new(50)
            }
        );
    }

    #[test]
    fn test_oracle_failure_records_nothing() {
        let oracle = TimestampOracle::new(
            tso_durability::TimestampLog::ephemeral(),
            Timestamp::new(u64::MAX - 1),
            1,
        );
        let manager = CommitManager::new(oracle, ManagerOptions::default());
        let start = manager.timestamp().unwrap();
        assert_eq!(start, Timestamp::MAX);

        let err = manager
            .commit(CommitRequest::new(start, ws(&["a"])))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(manager.is_halted());
        assert!(manager.state.lock().history.is_empty());
    }

    #[test]
    fn test_concurrent_disjoint_commits_all_succeed() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 200;

        let manager = Arc::new(CommitManager::ephemeral());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut commits = Vec::new();
                    for i in 0..PER_THREAD {
                        let start = manager.timestamp().unwrap();
                        let row = format!("t{}-r{}", t, i);
                        match manager
                            .commit(CommitRequest::new(start, ws(&[&row])))
                            .unwrap()
                        {
                            Response::Commit {
                                commit_timestamp, ..
                            } => {
                                assert!(commit_timestamp > start);
                                commits.push(commit_timestamp);
                            }
                            other => panic!("unexpected {:?}", other),
                        }
                    }
                    commits
                })
            })
            .collect();

        let mut all: Vec<Timestamp> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), THREADS * PER_THREAD);
    }

    #[test]
    fn test_concurrent_same_cell_single_winner_per_round() {
        const THREADS: usize = 8;

        let manager = Arc::new(CommitManager::ephemeral());
        // Every contender shares the same start timestamp
        let start = manager.timestamp().unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    manager
                        .commit(CommitRequest::new(start, ws(&["hot"])))
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| matches!(r, Response::Commit { .. }))
            .count();
        assert_eq!(winners, 1);
    }
}
