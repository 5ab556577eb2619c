//! Durability Module
//!
//! DuraKV keeps two independent on-disk copies of the keyspace:
//!
//! - `aof`: an append-only log of every mutating command, replayed on start
//! - `snapshot`: a checksummed, full point-in-time dump of the store
//! - `scheduler`: timer tasks that trigger snapshots and flush the log
//!
//! ## Architecture
//!
//! ```text
//!   CommandHandler ──append──> AppendOnlyLog ──(1s flusher)──> appendonly.aof
//!         │
//!         └──record_change──> SnapshotManager <──tick── save rule timers
//!                                    │
//!                                    └──save──> dump.rdb (SHA-256 verified)
//! ```

pub mod aof;
pub mod scheduler;
pub mod snapshot;

pub use aof::{AppendOnlyLog, ReplayStats};
pub use scheduler::{start_save_timers, PeriodicTask};
pub use snapshot::SnapshotManager;

use crate::protocol::EncodeError;
use std::io;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Runs synchronous disk work without stalling the other tasks on this
/// worker thread.
///
/// On the multi-threaded runtime the worker hands its queue to another thread
/// for the duration of `f`. Elsewhere (current-thread runtime, blocking pool,
/// no runtime) `f` simply runs inline.
pub fn run_blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Errors raised by the log and snapshot subsystems.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// File open, write, seek or sync failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot document could not be serialized
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    /// Log record could not be serialized
    #[error("failed to encode log record: {0}")]
    Frame(#[from] EncodeError),

    /// Snapshot file could not be decoded
    #[error("failed to decode snapshot: {0}")]
    Decode(String),

    /// The bytes on disk differ from the bytes that were written
    #[error("snapshot checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Background save already in progress")]
    BackgroundSaveInProgress,
}
