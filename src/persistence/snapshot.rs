//! Point-in-Time Snapshots
//!
//! A snapshot is a JSON document holding every record in the store. Keys and
//! values are hex-encoded so arbitrary bytes survive; expiry and access
//! times are Unix milliseconds.
//!
//! ## Write Path
//!
//! 1. Encode the records into memory and hash them with SHA-256
//! 2. Truncate and rewrite the file, then `fsync`
//! 3. Seek back to the start and hash what is actually on disk
//! 4. A mismatch is reported as [`PersistenceError::ChecksumMismatch`]
//!
//! File writes are serialized by an I/O lock so a timer save and a `SAVE`
//! never interleave their bytes.
//!
//! ## Background Saves
//!
//! `BGSAVE` deep-copies the store up front and serializes that copy on the
//! blocking pool. While it runs, any other save writes the same copy.

use crate::config::SaveRule;
use crate::persistence::PersistenceError;
use crate::storage::{from_unix_millis, unix_millis, Entry, StorageEngine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Current on-disk format version.
const SNAPSHOT_VERSION: u32 = 1;

type Records = HashMap<Bytes, Entry>;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<u64>,
    last_access_ms: u64,
    accesses: u64,
}

/// Owns the snapshot file, the save rules and their change counters.
#[derive(Debug)]
pub struct SnapshotManager {
    path: PathBuf,
    rules: Vec<SaveRule>,
    /// Mutations since each rule's last tick, indexed like `rules`
    changes: Vec<AtomicU64>,
    /// Copy being written by an in-flight BGSAVE
    background: Mutex<Option<Arc<Records>>>,
    io_lock: Mutex<()>,
    /// Held by tests to park a background save before it writes
    #[cfg(test)]
    background_gate: Mutex<()>,
    /// Overwrites the file between the write and the re-hash
    #[cfg(test)]
    corrupt_next_write: std::sync::atomic::AtomicBool,
}

impl SnapshotManager {
    pub fn new(path: impl Into<PathBuf>, rules: Vec<SaveRule>) -> Self {
        let changes = rules.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            path: path.into(),
            rules,
            changes,
            background: Mutex::new(None),
            io_lock: Mutex::new(()),
            #[cfg(test)]
            background_gate: Mutex::new(()),
            #[cfg(test)]
            corrupt_next_write: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rules(&self) -> &[SaveRule] {
        &self.rules
    }

    /// Counts `count` mutations against every rule.
    pub fn record_changes(&self, count: u64) {
        for counter in &self.changes {
            counter.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Returns the mutations counted for rule `index` and resets it to zero.
    pub fn take_changes(&self, index: usize) -> u64 {
        self.changes
            .get(index)
            .map(|counter| counter.swap(0, Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Whether a BGSAVE is currently running.
    pub fn background_save_in_progress(&self) -> bool {
        self.background_slot().is_some()
    }

    fn background_slot(&self) -> MutexGuard<'_, Option<Arc<Records>>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn io(&self) -> MutexGuard<'_, ()> {
        self.io_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the store to disk and verifies the result.
    ///
    /// Returns the number of records written.
    pub fn save(&self, storage: &StorageEngine) -> Result<usize, PersistenceError> {
        let in_flight = self.background_slot().clone();
        match in_flight {
            Some(copy) => self.write_records(&copy),
            None => self.write_records(&storage.snapshot()),
        }
    }

    /// Starts a background save of a deep copy of the store.
    ///
    /// Must be called from within a Tokio runtime. Fails if another
    /// background save has not finished yet.
    pub fn start_background_save(
        self: &Arc<Self>,
        storage: &StorageEngine,
    ) -> Result<JoinHandle<()>, PersistenceError> {
        let copy = {
            let mut slot = self.background_slot();
            if slot.is_some() {
                return Err(PersistenceError::BackgroundSaveInProgress);
            }
            let copy = Arc::new(storage.snapshot());
            *slot = Some(Arc::clone(&copy));
            copy
        };

        info!(records = copy.len(), "Background save started");

        let manager = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || {
            #[cfg(test)]
            let _gate = manager.hold_background();
            if let Err(e) = manager.write_records(&copy) {
                error!(path = %manager.path.display(), error = %e, "Background save failed");
            }
            *manager.background_slot() = None;
        }))
    }

    /// Loads the snapshot file into `storage`, replacing its contents.
    ///
    /// Returns `false` if there is no snapshot file yet.
    pub fn load(&self, storage: &StorageEngine) -> Result<bool, PersistenceError> {
        let data = {
            let _io = self.io();
            match std::fs::read(&self.path) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    info!(path = %self.path.display(), "No snapshot found, starting empty");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let records = decode(&data)?;
        let count = records.len();
        storage.restore(records);

        info!(path = %self.path.display(), records = count, "Snapshot loaded");
        Ok(true)
    }

    fn write_records(&self, records: &Records) -> Result<usize, PersistenceError> {
        let start = Instant::now();
        let data = encode(records)?;
        let expected = digest(&data);

        let _io = self.io();
        let mut file = self.write_file(&data)?;
        #[cfg(test)]
        if self.corrupt_next_write.swap(false, Ordering::SeqCst) {
            std::fs::write(&self.path, b"corrupted")?;
        }
        verify(&mut file, &expected)?;

        info!(
            path = %self.path.display(),
            records = records.len(),
            bytes = data.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Snapshot saved"
        );
        Ok(records.len())
    }

    /// Truncates the snapshot file and writes `data`, synced to disk.
    fn write_file(&self, data: &[u8]) -> io::Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(file)
    }

    #[cfg(test)]
    pub(crate) fn hold_io(&self) -> MutexGuard<'_, ()> {
        self.io()
    }

    #[cfg(test)]
    pub(crate) fn hold_background(&self) -> MutexGuard<'_, ()> {
        self.background_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hex SHA-256 of `data`.
pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Re-reads `file` from the start and compares its hash with `expected`.
fn verify(file: &mut File, expected: &str) -> Result<(), PersistenceError> {
    file.seek(SeekFrom::Start(0))?;
    let mut hasher = Sha256::new();
    io::copy(file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());

    if actual != expected {
        return Err(PersistenceError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn encode(records: &Records) -> Result<Vec<u8>, PersistenceError> {
    let entries = records
        .iter()
        .map(|(key, entry)| SnapshotEntry {
            key: hex::encode(key),
            value: hex::encode(&entry.value),
            expires_at_ms: entry.expires_at.map(unix_millis),
            last_access_ms: unix_millis(entry.last_accessed()),
            accesses: entry.accesses(),
        })
        .collect();

    let document = SnapshotFile {
        version: SNAPSHOT_VERSION,
        entries,
    };
    serde_json::to_vec(&document).map_err(PersistenceError::Encode)
}

fn decode(data: &[u8]) -> Result<Records, PersistenceError> {
    let document: SnapshotFile =
        serde_json::from_slice(data).map_err(|e| PersistenceError::Decode(e.to_string()))?;

    if document.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::Decode(format!(
            "unsupported snapshot version {}",
            document.version
        )));
    }

    document
        .entries
        .into_iter()
        .map(|entry| {
            let key = hex::decode(&entry.key)
                .map_err(|e| PersistenceError::Decode(format!("bad key {:?}: {}", entry.key, e)))?;
            let value = hex::decode(&entry.value)
                .map_err(|e| PersistenceError::Decode(format!("bad value for {:?}: {}", entry.key, e)))?;
            let record = Entry::with_metadata(
                Bytes::from(value),
                entry.expires_at_ms.map(from_unix_millis),
                from_unix_millis(entry.last_access_ms),
                entry.accesses,
            );
            Ok((Bytes::from(key), record))
        })
        .collect()
}
