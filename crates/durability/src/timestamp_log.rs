//! Durable high-water mark log
//!
//! The oracle reserves timestamps in windows and records each reservation
//! here before handing out any timestamp of that window. After a crash the
//! log tells the oracle where to resume so that no timestamp is issued twice.
//!
//! ## Record Format
//!
//! ```text
//! +----------------+----------------+-----------+
//! | high_water u64 |    skip u64    | crc32 u32 |
//! +----------------+----------------+-----------+
//!        LE               LE             LE
//! ```
//!
//! `skip` is the timestamp space that may have been reserved after this
//! record without being synced (non-zero only in batched mode). Recovery
//! resumes above `max(high_water + skip)` over all valid records.
//!
//! ## Recovery Rules
//!
//! - A partial record at the end of the file (torn write) is ignored
//! - Records with a bad checksum are skipped and counted
//! - A non-empty log without a single valid record is an error: the safe
//!   resume point is unknown
//!
//! On open the log is compacted to a single synced record holding the resume
//! point, so a second crash cannot lose the skip.

use crate::mode::DurabilityMode;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use tso_core::Timestamp;

/// File name of the log inside the data directory
pub const LOG_FILENAME: &str = "timestamp.log";

/// Size of one encoded record in bytes
pub const RECORD_SIZE: usize = 20;

/// Records kept before the log is compacted to a single record
pub const MAX_RECORDS: usize = 4096;

/// Errors raised by the durability layer
#[derive(Debug, Error)]
pub enum DurabilityError {
    /// Underlying file operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log holds data but no record passed validation
    #[error("timestamp log corrupted: {records} record(s), none valid")]
    Corrupted {
        /// Number of complete records found
        records: u64,
    },
}

/// A single reservation record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Highest timestamp reserved
    pub high_water: Timestamp,
    /// Space possibly reserved after this record without a sync
    pub skip: u64,
}

impl Reservation {
    /// Highest timestamp that may have been issued by the writer of this record
    pub fn resume_point(&self) -> Timestamp {
        Timestamp::new(self.high_water.as_u64().saturating_add(self.skip))
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        // Writes into a Vec cannot fail
        let _ = buf.write_u64::<LittleEndian>(self.high_water.as_u64());
        let _ = buf.write_u64::<LittleEndian>(self.skip);
        let crc = crc32fast::hash(&buf);
        let _ = buf.write_u32::<LittleEndian>(crc);
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != RECORD_SIZE {
            return None;
        }
        let mut cursor = Cursor::new(bytes);
        let high_water = cursor.read_u64::<LittleEndian>().ok()?;
        let skip = cursor.read_u64::<LittleEndian>().ok()?;
        let crc = cursor.read_u32::<LittleEndian>().ok()?;
        if crc32fast::hash(&bytes[..16]) != crc {
            return None;
        }
        Some(Reservation {
            high_water: Timestamp::new(high_water),
            skip,
        })
    }
}

/// Outcome of scanning the log at startup
#[derive(Debug, Default, Clone)]
pub struct LogRecovery {
    /// Complete records read
    pub records_read: u64,
    /// Records skipped because of a checksum mismatch
    pub corrupt_records: u64,
    /// Bytes of a partial record at the end of the log
    pub torn_tail_bytes: u64,
    /// Highest timestamp any previous incarnation may have issued
    pub resume_after: Timestamp,
}

impl LogRecovery {
    /// Scan raw log bytes
    pub fn scan(bytes: &[u8]) -> Result<Self, DurabilityError> {
        let mut result = LogRecovery::default();
        let mut valid = 0u64;

        let mut chunks = bytes.chunks_exact(RECORD_SIZE);
        for chunk in &mut chunks {
            result.records_read += 1;
            match Reservation::decode(chunk) {
                Some(reservation) => {
                    valid += 1;
                    result.resume_after = result.resume_after.max(reservation.resume_point());
                }
                None => result.corrupt_records += 1,
            }
        }
        result.torn_tail_bytes = chunks.remainder().len() as u64;

        if valid == 0 && result.records_read > 0 {
            return Err(DurabilityError::Corrupted {
                records: result.records_read,
            });
        }
        Ok(result)
    }

    /// Whether anything unusual was found
    pub fn had_damage(&self) -> bool {
        self.corrupt_records > 0 || self.torn_tail_bytes > 0
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Recovered timestamp log: {} record(s), {} corrupt, {} torn byte(s), resume after {}",
            self.records_read, self.corrupt_records, self.torn_tail_bytes, self.resume_after
        )
    }
}

struct LogFile {
    dir: PathBuf,
    file: File,
    records: usize,
}

/// Append-only log of timestamp reservations
pub struct TimestampLog {
    file: Option<LogFile>,
    mode: DurabilityMode,
    unsynced: usize,
    last_sync: Instant,
}

impl TimestampLog {
    /// A log that persists nothing
    pub fn ephemeral() -> Self {
        TimestampLog {
            file: None,
            mode: DurabilityMode::None,
            unsynced: 0,
            last_sync: Instant::now(),
        }
    }

    /// Open (or create) the log in `dir` and recover the resume point
    ///
    /// With [`DurabilityMode::None`] nothing is read or written and the
    /// recovery reports a resume point of zero.
    pub fn open(
        dir: impl AsRef<Path>,
        mode: DurabilityMode,
    ) -> Result<(Self, LogRecovery), DurabilityError> {
        if !mode.requires_log() {
            return Ok((Self::ephemeral(), LogRecovery::default()));
        }

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOG_FILENAME);

        let recovery = match fs::read(&path) {
            Ok(bytes) => LogRecovery::scan(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => LogRecovery::default(),
            Err(e) => return Err(e.into()),
        };

        if recovery.had_damage() {
            warn!(
                corrupt_records = recovery.corrupt_records,
                torn_tail_bytes = recovery.torn_tail_bytes,
                "Timestamp log damaged; continuing from valid records"
            );
        }
        info!(resume_after = %recovery.resume_after, "{}", recovery.summary());

        // Persist the resume point before anything above it is handed out
        let checkpoint = Reservation {
            high_water: recovery.resume_after,
            skip: 0,
        };
        let file = rewrite(&dir, &checkpoint)?;

        let log = TimestampLog {
            file: Some(LogFile {
                dir,
                file,
                records: 1,
            }),
            mode,
            unsynced: 0,
            last_sync: Instant::now(),
        };
        Ok((log, recovery))
    }

    /// Durability mode of this log
    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Record a reservation of `window` timestamps ending at `high_water`
    ///
    /// In strict mode the record is synced before returning. In batched mode
    /// the record is synced once `batch_size` records are pending or
    /// `interval_ms` passed since the last sync.
    pub fn append(&mut self, high_water: Timestamp, window: u64) -> Result<(), DurabilityError> {
        let mode = self.mode;
        let Some(log) = self.file.as_mut() else {
            return Ok(());
        };

        let reservation = Reservation {
            high_water,
            skip: mode.recovery_skip(window),
        };
        log.file.write_all(&reservation.encode())?;
        log.records += 1;
        self.unsynced += 1;

        let due = match mode {
            DurabilityMode::None => false,
            DurabilityMode::Strict => true,
            DurabilityMode::Batched {
                interval_ms,
                batch_size,
            } => {
                self.unsynced >= batch_size
                    || self.last_sync.elapsed() >= Duration::from_millis(interval_ms)
            }
        };
        if due {
            self.sync()?;
        }

        let needs_compaction = self
            .file
            .as_ref()
            .map(|log| log.records > MAX_RECORDS)
            .unwrap_or(false);
        if needs_compaction {
            self.compact(reservation)?;
        }
        Ok(())
    }

    /// Force pending records to disk
    pub fn sync(&mut self) -> Result<(), DurabilityError> {
        if let Some(log) = self.file.as_mut() {
            log.file.sync_data()?;
            self.unsynced = 0;
            self.last_sync = Instant::now();
        }
        Ok(())
    }

    fn compact(&mut self, latest: Reservation) -> Result<(), DurabilityError> {
        if let Some(log) = self.file.as_mut() {
            // Unsynced records are folded into `latest` through its skip
            log.file = rewrite(&log.dir, &latest)?;
            debug!(records = log.records, "Compacted timestamp log");
            log.records = 1;
            self.unsynced = 0;
            self.last_sync = Instant::now();
        }
        Ok(())
    }
}

impl Drop for TimestampLog {
    fn drop(&mut self) {
        if self.unsynced > 0 {
            if let Err(e) = self.sync() {
                warn!(error = %e, "Failed to sync timestamp log on drop");
            }
        }
    }
}

/// Atomically replace the log with a single synced record
fn rewrite(dir: &Path, record: &Reservation) -> Result<File, DurabilityError> {
    let path = dir.join(LOG_FILENAME);
    let tmp = dir.join(format!("{}.tmp", LOG_FILENAME));

    {
        let mut file = File::create(&tmp)?;
        file.write_all(&record.encode())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    // Directory fsync is not supported everywhere
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }

    Ok(OpenOptions::new().append(true).open(&path)?)
}
