//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the core storage engine for DuraKV: a map from
//! binary-safe keys to [`Entry`] records guarded by a single `RwLock`.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               StorageEngine                 │
//! │  ┌───────────────────────────────────────┐  │
//! │  │ RwLock<HashMap<Bytes, Entry>>         │  │
//! │  │  GET/EXISTS/KEYS/DBSIZE -> read lock  │  │
//! │  │  SET/DEL/EXPIRE/FLUSHDB -> write lock │  │
//! │  └───────────────────────────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! No two mutations interleave; readers only run alongside other readers.
//!
//! ## Lazy Expiry
//!
//! Expiry is only enforced by [`StorageEngine::ttl`]. `get`, `exists`,
//! `keys` and `len` report expired records as present until `TTL` has
//! touched them.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Converts a wall-clock time to milliseconds since the Unix epoch.
///
/// Times before the epoch clamp to zero.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts milliseconds since the Unix epoch back to a wall-clock time.
pub fn from_unix_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH
        .checked_add(Duration::from_millis(ms))
        .unwrap_or_else(|| UNIX_EPOCH + Duration::from_secs(u32::MAX as u64))
}

/// Returns the wall-clock time `seconds` from now, saturating at the epoch.
pub fn deadline_after_secs(seconds: i64) -> SystemTime {
    let now_ms = unix_millis(SystemTime::now()) as i64;
    let deadline_ms = now_ms.saturating_add(seconds.saturating_mul(1000));
    from_unix_millis(deadline_ms.max(0) as u64)
}

/// Represents a stored value with optional expiry time.
#[derive(Debug)]
pub struct Entry {
    /// The actual value stored
    pub value: Bytes,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<SystemTime>,
    /// Last access time in Unix milliseconds
    last_accessed_ms: AtomicU64,
    /// Number of reads since the entry was written
    accesses: AtomicU64,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            expires_at: self.expires_at,
            last_accessed_ms: AtomicU64::new(self.last_accessed_ms.load(Ordering::Relaxed)),
            accesses: AtomicU64::new(self.accesses.load(Ordering::Relaxed)),
        }
    }
}

impl Entry {
    /// Creates a new entry without expiry.
    pub fn new(value: Bytes) -> Self {
        Self::with_metadata(value, None, SystemTime::now(), 0)
    }

    /// Rebuilds an entry with explicit metadata, e.g. when loading a snapshot.
    pub fn with_metadata(
        value: Bytes,
        expires_at: Option<SystemTime>,
        last_accessed: SystemTime,
        accesses: u64,
    ) -> Self {
        Self {
            value,
            expires_at,
            last_accessed_ms: AtomicU64::new(unix_millis(last_accessed)),
            accesses: AtomicU64::new(accesses),
        }
    }

    /// Checks if this entry has expired.
    ///
    /// An entry whose deadline is exactly now counts as expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| SystemTime::now() >= exp)
            .unwrap_or(false)
    }

    /// Returns the remaining TTL in whole seconds, or None if no expiry.
    pub fn ttl_secs(&self) -> Option<i64> {
        self.expires_at.map(|exp| {
            exp.duration_since(SystemTime::now())
                .map(|left| left.as_secs() as i64)
                .unwrap_or(0)
        })
    }

    /// When the entry was last read or written.
    pub fn last_accessed(&self) -> SystemTime {
        from_unix_millis(self.last_accessed_ms.load(Ordering::Relaxed))
    }

    /// How many times the entry has been read.
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Records a read. Safe under a shared lock.
    fn touch(&self) {
        self.last_accessed_ms
            .store(unix_millis(SystemTime::now()), Ordering::Relaxed);
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }
}

/// The main storage engine for DuraKV.
///
/// It is constructed once by the server and shared through an `Arc` with
/// every connection, the command handler and the persistence layer.
///
/// # Example
///
/// ```
/// use durakv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// // Set a key
/// engine.set(Bytes::from("name"), Bytes::from("Ariz"));
///
/// // Get the value
/// let entry = engine.get(&Bytes::from("name")).unwrap();
/// assert_eq!(entry.value, Bytes::from("Ariz"));
/// ```
#[derive(Debug, Default)]
pub struct StorageEngine {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl StorageEngine {
    /// Creates a new, empty storage engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access to the map. A poisoned lock is recovered, never panicked on.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the map.
    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a key-value pair, discarding any previous expiry.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.write().insert(key, Entry::new(value)).is_none()
    }

    /// Gets a copy of the record for a key.
    ///
    /// Expired records are still returned; see the module docs on lazy expiry.
    pub fn get(&self, key: &Bytes) -> Option<Entry> {
        let data = self.read();
        data.get(key).map(|entry| {
            entry.touch();
            entry.clone()
        })
    }

    /// Deletes a key from the database.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &Bytes) -> bool {
        self.write().remove(key).is_some()
    }

    /// Deletes multiple keys under one write lock.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were deleted.
    pub fn delete_many(&self, keys: &[Bytes]) -> u64 {
        let mut data = self.write();
        keys.iter().filter(|key| data.remove(*key).is_some()).count() as u64
    }

    /// Checks if a record exists for the key, expired or not.
    pub fn exists(&self, key: &Bytes) -> bool {
        self.read().contains_key(key)
    }

    /// Counts how many of the given keys exist. Repeated keys count each time.
    pub fn exists_many(&self, keys: &[Bytes]) -> u64 {
        let data = self.read();
        keys.iter().filter(|key| data.contains_key(*key)).count() as u64
    }

    /// Sets an absolute expiry time on an existing key.
    ///
    /// A deadline in the past is accepted; the record is then expired and
    /// will be evicted the next time `ttl` looks at it.
    ///
    /// # Returns
    ///
    /// Returns `true` if the expiry was set, `false` if the key doesn't exist.
    pub fn expire_at(&self, key: &Bytes, deadline: SystemTime) -> bool {
        match self.write().get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        }
    }

    /// Sets a relative expiry on an existing key. Zero or negative seconds
    /// expire the key immediately.
    pub fn expire(&self, key: &Bytes, seconds: i64) -> bool {
        self.expire_at(key, deadline_after_secs(seconds))
    }

    /// Gets the remaining TTL for a key in seconds, evicting it if expired.
    ///
    /// # Returns
    ///
    /// - `Some(seconds)` if the key exists and has an expiry
    /// - `Some(-1)` if the key exists but has no expiry
    /// - `None` if the key doesn't exist or was just evicted
    pub fn ttl(&self, key: &Bytes) -> Option<i64> {
        {
            let data = self.read();
            match data.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired() => return Some(entry.ttl_secs().unwrap_or(-1)),
                Some(_) => {}
            }
        }

        // Expired - need the write lock to evict it
        let mut data = self.write();
        match data.get(key) {
            Some(entry) if entry.is_expired() => {
                data.remove(key);
                None
            }
            // Race: another writer replaced the key in between
            Some(entry) => Some(entry.ttl_secs().unwrap_or(-1)),
            None => None,
        }
    }

    /// Returns all keys matching a glob pattern.
    ///
    /// Supported patterns:
    /// - `*` matches everything
    /// - `h*llo` matches hello, hallo, hxllo
    /// - `h?llo` matches hello, hallo, but not hllo
    /// - `h[ae]llo` matches hello and hallo, but not hillo
    /// - `h[^e]llo` matches hallo, but not hello
    /// - `h[a-b]llo` matches hallo and hbllo
    ///
    /// The pattern must match the whole key. Expired records are listed too.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let pattern = GlobPattern::new(pattern);

        self.read()
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect()
    }

    /// Clears all data from the database.
    ///
    /// This is equivalent to the Redis FLUSHDB command.
    ///
    /// # Returns
    ///
    /// Returns the number of records removed.
    pub fn flush(&self) -> usize {
        let mut data = self.write();
        let removed = data.len();
        data.clear();
        removed
    }

    /// Returns the number of records, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Takes an independent deep copy of every record.
    ///
    /// The copy is used by background saves so writers can keep going while
    /// the copy is serialized.
    pub fn snapshot(&self) -> HashMap<Bytes, Entry> {
        self.read().clone()
    }

    /// Replaces every record with the given map.
    pub fn restore(&self, records: HashMap<Bytes, Entry>) {
        *self.write() = records;
    }
}

/// Simple glob pattern matcher for the KEYS command.
struct GlobPattern<'a> {
    pattern: &'a [u8],
}

impl<'a> GlobPattern<'a> {
    fn new(pattern: &'a [u8]) -> Self {
        Self { pattern }
    }

    fn matches(&self, text: &[u8]) -> bool {
        Self::matches_recursive(self.pattern, text)
    }

    fn matches_recursive(pattern: &[u8], text: &[u8]) -> bool {
        if pattern.is_empty() {
            return text.is_empty();
        }

        match pattern[0] {
            b'*' => {
                // Try matching zero or more characters
                (0..=text.len()).any(|i| Self::matches_recursive(&pattern[1..], &text[i..]))
            }
            b'?' => !text.is_empty() && Self::matches_recursive(&pattern[1..], &text[1..]),
            b'[' => {
                if text.is_empty() {
                    return false;
                }

                let mut i = 1;
                let mut matched = false;
                let negate = pattern.get(1) == Some(&b'^');
                if negate {
                    i += 1;
                }

                while i < pattern.len() && pattern[i] != b']' {
                    if pattern[i] == b'\\' && i + 1 < pattern.len() {
                        i += 1;
                        matched |= pattern[i] == text[0];
                    } else if i + 2 < pattern.len()
                        && pattern[i + 1] == b'-'
                        && pattern[i + 2] != b']'
                    {
                        // Ranges like [a-z], in either order
                        let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                            (pattern[i], pattern[i + 2])
                        } else {
                            (pattern[i + 2], pattern[i])
                        };
                        matched |= (lo..=hi).contains(&text[0]);
                        i += 2;
                    } else {
                        matched |= pattern[i] == text[0];
                    }
                    i += 1;
                }

                // Unterminated class never matches
                if i >= pattern.len() {
                    return false;
                }

                matched != negate && Self::matches_recursive(&pattern[i + 1..], &text[1..])
            }
            b'\\' if pattern.len() > 1 => {
                !text.is_empty()
                    && pattern[1] == text[0]
                    && Self::matches_recursive(&pattern[2..], &text[1..])
            }
            c => !text.is_empty() && c == text[0] && Self::matches_recursive(&pattern[1..], &text[1..]),
        }
    }
}
