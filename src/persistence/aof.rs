//! Append-Only Log
//!
//! Every mutating command is appended to the log as the RESP frame that
//! reproduces it. On startup the log is replayed from the beginning through a
//! replay-only [`CommandHandler`] to rebuild the keyspace.
//!
//! ## Ordering
//!
//! The writer mutex is held while the frame is written *and* while the
//! mutation is applied to the store, so the order of records in the file is
//! exactly the order in which mutations became visible.
//!
//! ## Durability
//!
//! | Policy     | Buffer flushed          | `fsync`                 |
//! |------------|-------------------------|-------------------------|
//! | `always`   | before every reply      | before every reply      |
//! | `everysec` | by the 1s flusher task  | by the 1s flusher task  |
//! | `no`       | by the 1s flusher task  | left to the OS          |
//!
//! ## Corruption
//!
//! Replay never aborts. A frame that fails to decode, or that decodes to
//! something other than an array of bulk strings, is skipped by scanning
//! forward to the next line starting with `*`.

use crate::commands::CommandHandler;
use crate::config::FsyncPolicy;
use crate::persistence::{PeriodicTask, PersistenceError};
use crate::protocol::{parse_message, RespValue};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the background flusher runs.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Counters reported after a replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records executed successfully
    pub applied: u64,
    /// Corrupt, truncated or rejected records
    pub skipped: u64,
}

/// Handle to an open append-only log file.
#[derive(Debug)]
pub struct AppendOnlyLog {
    path: PathBuf,
    policy: FsyncPolicy,
    writer: Mutex<BufWriter<File>>,
}

impl AppendOnlyLog {
    /// Opens (creating if needed) the log at `path` in append mode.
    pub fn open(path: impl AsRef<Path>, policy: FsyncPolicy) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(path = %path.display(), policy = %policy, "Append-only log opened");

        Ok(Self {
            path,
            policy,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    fn writer(&self) -> MutexGuard<'_, BufWriter<File>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `record` to the log and then runs `apply` while still holding
    /// the log lock.
    ///
    /// If the record cannot be written, `apply` is not run and the error is
    /// returned; the store never gets ahead of the log.
    pub fn append_with<T>(
        &self,
        record: &RespValue,
        apply: impl FnOnce() -> T,
    ) -> Result<T, PersistenceError> {
        let frame = record.serialize()?;

        let mut writer = self.writer();
        writer.write_all(&frame)?;
        if self.policy == FsyncPolicy::Always {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }

        Ok(apply())
    }

    /// Appends a record with no associated store mutation.
    pub fn append(&self, record: &RespValue) -> Result<(), PersistenceError> {
        self.append_with(record, || ())
    }

    /// Pushes buffered records to the OS, syncing them under `everysec`.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let mut writer = self.writer();
        writer.flush()?;
        if self.policy == FsyncPolicy::EverySec {
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Starts the once-per-second flusher. Stops when the handle is dropped.
    pub fn start_flusher(self: &Arc<Self>) -> PeriodicTask {
        let log = Arc::clone(self);
        PeriodicTask::spawn("aof-flush", FLUSH_INTERVAL, move || {
            if let Err(e) = log.flush() {
                error!(path = %log.path.display(), error = %e, "Append-only log flush failed");
            }
        })
    }

    /// Replays the log at `path` through `handler`.
    ///
    /// A missing file is an empty log. `handler` should be built with
    /// [`CommandHandler::for_replay`] so replayed commands are not logged again.
    pub fn replay(path: impl AsRef<Path>, handler: &CommandHandler) -> Result<ReplayStats, PersistenceError> {
        let path = path.as_ref();
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No append-only log to replay");
                return Ok(ReplayStats::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut stats = ReplayStats::default();
        let mut pos = 0;

        while pos < data.len() {
            match parse_message(&data[pos..]) {
                Ok(Some((frame, consumed))) if is_record(&frame) => {
                    let reply = handler.execute(frame);
                    if reply.is_error() {
                        warn!(offset = pos, reply = %reply, "Replayed record was rejected");
                        stats.skipped += 1;
                    } else {
                        stats.applied += 1;
                    }
                    pos += consumed;
                    continue;
                }
                Ok(Some(_)) => {
                    warn!(offset = pos, "Skipping log entry that is not a command");
                }
                Ok(None) => {
                    warn!(offset = pos, "Skipping truncated log record");
                }
                Err(e) => {
                    warn!(offset = pos, error = %e, "Skipping corrupt log record");
                }
            }

            stats.skipped += 1;
            match next_record_start(&data, pos + 1) {
                Some(next) => pos = next,
                None => break,
            }
        }

        info!(
            path = %path.display(),
            applied = stats.applied,
            skipped = stats.skipped,
            "Append-only log replayed"
        );
        Ok(stats)
    }
}

/// A replayable record is a non-empty array of bulk strings.
fn is_record(frame: &RespValue) -> bool {
    match frame.as_array() {
        Some(items) => {
            !items.is_empty() && items.iter().all(|item| matches!(item, RespValue::BulkString(_)))
        }
        None => false,
    }
}

/// Finds the next `*` that begins a line, at or after `from`.
fn next_record_start(data: &[u8], from: usize) -> Option<usize> {
    (from.max(2)..data.len()).find(|&i| data[i] == b'*' && &data[i - 2..i] == b"\r\n")
}
