//! Timestamp oracle
//!
//! Issues strictly increasing timestamps. Timestamps are handed out from a
//! reserved window; before the first timestamp above the current high-water
//! mark is returned, a new window is recorded in the [`TimestampLog`]. After a
//! restart the oracle resumes above the recovered mark, so no value a client
//! could have observed is ever issued again.
//!
//! ```text
//!   last issued         high-water mark
//!        |                    |
//! -------+====================+---------->
//!          reserved, not yet
//!          issued
//! ```

use crate::error::OracleError;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, error, info};
use tso_core::Timestamp;
use tso_durability::{DurabilityError, DurabilityMode, LogRecovery, TimestampLog};

/// Default number of timestamps reserved per log record
pub const DEFAULT_RESERVATION_WINDOW: u64 = 10_000;

struct OracleState {
    last: Timestamp,
    high_water: Timestamp,
    log: TimestampLog,
    halted: Option<OracleError>,
}

/// Issues strictly increasing timestamps
///
/// # Thread Safety
///
/// `next()` may be called from any thread. Allocation is serialized by an
/// internal lock that is held only for the increment and, once per window,
/// for the reservation write.
pub struct TimestampOracle {
    state: Mutex<OracleState>,
    window: u64,
    epoch_start: Timestamp,
}

impl TimestampOracle {
    /// Create an oracle that resumes above `resume_after`
    ///
    /// # Arguments
    /// * `log` - Where reservations are recorded
    /// * `resume_after` - Highest timestamp a previous incarnation may have issued
    /// * `window` - Timestamps reserved per log record (at least 1)
    pub fn new(log: TimestampLog, resume_after: Timestamp, window: u64) -> Self {
        TimestampOracle {
            state: Mutex::new(OracleState {
                last: resume_after,
                high_water: resume_after,
                log,
                halted: None,
            }),
            window: window.max(1),
            epoch_start: Timestamp::new(resume_after.as_u64().saturating_add(1)),
        }
    }

    /// In-memory oracle starting at 1
    pub fn ephemeral() -> Self {
        Self::new(
            TimestampLog::ephemeral(),
            Timestamp::ZERO,
            DEFAULT_RESERVATION_WINDOW,
        )
    }

    /// Open the reservation log in `dir` and resume above its mark
    pub fn open(
        dir: impl AsRef<Path>,
        mode: DurabilityMode,
        window: u64,
    ) -> Result<(Self, LogRecovery), DurabilityError> {
        let (log, recovery) = TimestampLog::open(dir, mode)?;
        info!(
            resume_after = %recovery.resume_after,
            mode = mode.description(),
            window,
            "Timestamp oracle recovered"
        );
        Ok((Self::new(log, recovery.resume_after, window), recovery))
    }

    /// Issue the next timestamp
    ///
    /// Strictly greater than every value previously returned by this oracle
    /// or by any earlier incarnation sharing its log.
    ///
    /// # Errors
    ///
    /// [`OracleError::Exhausted`] once `u64::MAX` has been issued, and
    /// [`OracleError::Durability`] if a reservation cannot be persisted. Both
    /// halt the oracle permanently.
    pub fn next(&self) -> Result<Timestamp, OracleError> {
        let mut state = self.state.lock();
        if let Some(e) = &state.halted {
            return Err(e.clone());
        }

        let Some(next) = state.last.checked_next() else {
            error!(last = %state.last, "Timestamp space exhausted, halting oracle");
            state.halted = Some(OracleError::Exhausted);
            return Err(OracleError::Exhausted);
        };

        if next > state.high_water {
            let high_water = Timestamp::new(next.as_u64().saturating_add(self.window - 1));
            if let Err(e) = state.log.append(high_water, self.window) {
                error!(error = %e, "Failed to persist reservation, halting oracle");
                let err = OracleError::Durability(e.to_string());
                state.halted = Some(err.clone());
                return Err(err);
            }
            debug!(high_water = %high_water, "Reserved timestamp window");
            state.high_water = high_water;
        }

        state.last = next;
        Ok(next)
    }

    /// Last issued timestamp (zero before the first issue)
    pub fn current(&self) -> Timestamp {
        self.state.lock().last
    }

    /// Highest reserved timestamp
    pub fn high_water_mark(&self) -> Timestamp {
        self.state.lock().high_water
    }

    /// First timestamp this incarnation may issue
    ///
    /// Everything below was potentially issued before the last restart.
    pub fn epoch_start(&self) -> Timestamp {
        self.epoch_start
    }

    /// Timestamps reserved per log record
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Check whether the oracle refuses further requests
    pub fn is_halted(&self) -> bool {
        self.state.lock().halted.is_some()
    }
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self::ephemeral()
    }
}
