//! Command Handler Module
//!
//! This module implements the Redis-compatible commands supported by DuraKV.
//! It takes decoded RESP arrays and dispatches them to the appropriate handlers.
//!
//! ## Supported Commands
//!
//! ### Key/Value Commands
//! - `SET key value` - Set a key, clearing any expiry
//! - `GET key` - Get a key's value
//! - `DEL key [key ...]` - Delete keys
//! - `EXISTS key [key ...]` - Count existing keys
//! - `KEYS pattern` - Find keys by glob pattern
//!
//! ### Expiry Commands
//! - `EXPIRE key seconds` - Set a relative expiry
//! - `PEXPIREAT key unix-ms` - Set an absolute expiry (the logged form of EXPIRE)
//! - `TTL key` - Get remaining TTL, evicting the key if it has expired
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `AUTH password` - Authenticate the connection
//! - `COMMAND` - Always replies OK
//! - `DBSIZE` - Number of keys
//! - `FLUSHDB` - Clear database
//! - `SAVE` - Write a snapshot now
//! - `BGSAVE` - Write a snapshot in the background
//!
//! Unknown commands get a null reply rather than an error.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  execute()  │───>│  dispatch() │───>│  cmd_*()    │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                  ┌────────────────────────────┼──────────┐  │
//! │                  ▼                            ▼          ▼  │
//! │           AppendOnlyLog              StorageEngine  SnapshotManager
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::config::FsyncPolicy;
use crate::persistence::{run_blocking, AppendOnlyLog, PersistenceError, SnapshotManager};
use crate::protocol::RespValue;
use crate::storage::{deadline_after_secs, from_unix_millis, unix_millis, StorageEngine};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Handles Redis commands by dispatching them to the appropriate handlers.
#[derive(Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<StorageEngine>,
    /// Snapshot file and save rule counters
    snapshots: Arc<SnapshotManager>,
    /// Append-only log, when enabled
    aof: Option<Arc<AppendOnlyLog>>,
    /// Password required by AUTH
    password: Option<Arc<str>>,
    /// Set while replaying the log: nothing is logged or counted
    replaying: bool,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>, snapshots: Arc<SnapshotManager>) -> Self {
        Self {
            storage,
            snapshots,
            aof: None,
            password: None,
            replaying: false,
        }
    }

    /// Creates a handler for log replay. It never appends to the log and
    /// never bumps the snapshot change counters.
    pub fn for_replay(storage: Arc<StorageEngine>, snapshots: Arc<SnapshotManager>) -> Self {
        Self {
            replaying: true,
            ..Self::new(storage, snapshots)
        }
    }

    /// Logs mutating commands to `aof`.
    pub fn with_aof(mut self, aof: Arc<AppendOnlyLog>) -> Self {
        if !self.replaying {
            self.aof = Some(aof);
        }
        self
    }

    /// Requires `password` for AUTH.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.map(Arc::from);
        self
    }

    /// Whether sessions must authenticate before issuing commands.
    pub fn requires_auth(&self) -> bool {
        self.password.is_some()
    }

    /// Executes a command and returns the response.
    ///
    /// # Arguments
    ///
    /// * `command` - The parsed RESP value (should be an array)
    ///
    /// # Returns
    ///
    /// The RESP response to send back to the client.
    pub fn execute(&self, command: RespValue) -> RespValue {
        // Commands should be arrays
        let args = match command {
            RespValue::Array(args) => args,
            _ => {
                return RespValue::error("ERR invalid command format");
            }
        };

        if args.is_empty() {
            return RespValue::error("ERR empty command");
        }

        let cmd_name = match command_name(&args[0]) {
            Some(name) => name,
            None => return RespValue::error("ERR invalid command name"),
        };

        // Dispatch to appropriate handler
        self.dispatch(&cmd_name, &args[1..])
    }

    /// Dispatches a command to its handler.
    fn dispatch(&self, cmd: &str, args: &[RespValue]) -> RespValue {
        match cmd {
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "KEYS" => self.cmd_keys(args),

            "EXPIRE" => self.cmd_expire(args),
            "PEXPIREAT" => self.cmd_pexpireat(args),
            "TTL" => self.cmd_ttl(args),

            "PING" => self.cmd_ping(args),
            "AUTH" => self.cmd_auth(args),
            "COMMAND" => RespValue::ok(),
            "DBSIZE" => self.cmd_dbsize(args),
            "FLUSHDB" => self.cmd_flushdb(args),
            "SAVE" => self.cmd_save(args),
            "BGSAVE" => self.cmd_bgsave(args),

            _ => {
                debug!(command = cmd, "Unknown command");
                RespValue::Nil
            }
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    /// Extracts a Bytes value from a RespValue.
    fn get_bytes(&self, value: &RespValue) -> Option<Bytes> {
        match value {
            RespValue::BulkString(b) => Some(b.clone()),
            RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
            _ => None,
        }
    }

    /// Extracts an integer from a RespValue.
    fn get_integer(&self, value: &RespValue) -> Option<i64> {
        match value {
            RespValue::Integer(n) => Some(*n),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
            RespValue::SimpleString(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Runs `apply` against the store, appending `record` to the log first
    /// when logging is enabled.
    fn apply_logged<T>(
        &self,
        record: impl FnOnce() -> RespValue,
        apply: impl FnOnce() -> T,
    ) -> Result<T, RespValue> {
        match &self.aof {
            Some(aof) => {
                let record = record();
                let result = if aof.policy() == FsyncPolicy::Always {
                    run_blocking(|| aof.append_with(&record, apply))
                } else {
                    aof.append_with(&record, apply)
                };
                result.map_err(|e| {
                    error!(path = %aof.path().display(), error = %e, "Failed to append to log");
                    persistence_error(&e)
                })
            }
            None => Ok(apply()),
        }
    }

    /// Counts mutations towards the save rules.
    fn record_changes(&self, count: u64) {
        if !self.replaying && count > 0 {
            self.snapshots.record_changes(count);
        }
    }

    // ========================================================================
    // Key/Value Commands
    // ========================================================================

    /// SET key value
    fn cmd_set(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'SET' command");
        }

        let key = match self.get_bytes(&args[0]) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };
        let value = match self.get_bytes(&args[1]) {
            Some(v) => v,
            None => return RespValue::error("ERR invalid value"),
        };

        let result = self.apply_logged(
            || record(&[Bytes::from_static(b"SET"), key.clone(), value.clone()]),
            || self.storage.set(key.clone(), value.clone()),
        );

        match result {
            Ok(_) => {
                self.record_changes(1);
                RespValue::ok()
            }
            Err(reply) => reply,
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'GET' command");
        }

        let key = match self.get_bytes(&args[0]) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };

        match self.storage.get(&key) {
            Some(entry) => RespValue::bulk_string(entry.value),
            None => RespValue::Nil,
        }
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'DEL' command");
        }

        let keys: Vec<Bytes> = args.iter().filter_map(|a| self.get_bytes(a)).collect();

        let result = self.apply_logged(
            || {
                let mut parts = vec![Bytes::from_static(b"DEL")];
                parts.extend(keys.iter().cloned());
                record(&parts)
            },
            || self.storage.delete_many(&keys),
        );

        match result {
            Ok(deleted) => {
                self.record_changes(deleted);
                RespValue::integer(deleted as i64)
            }
            Err(reply) => reply,
        }
    }

    /// EXISTS key [key ...]
    fn cmd_exists(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'EXISTS' command");
        }

        let keys: Vec<Bytes> = args.iter().filter_map(|a| self.get_bytes(a)).collect();

        let count = self.storage.exists_many(&keys);
        RespValue::integer(count as i64)
    }

    /// KEYS pattern
    fn cmd_keys(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'KEYS' command");
        }

        let pattern = match self.get_bytes(&args[0]) {
            Some(p) => p,
            None => return RespValue::error("ERR invalid pattern"),
        };

        let keys = self.storage.keys(&pattern);
        let values: Vec<RespValue> = keys.into_iter().map(RespValue::bulk_string).collect();

        RespValue::array(values)
    }

    // ========================================================================
    // Expiry Commands
    // ========================================================================

    /// EXPIRE key seconds
    ///
    /// Logged as `PEXPIREAT key <unix-ms>` so replay lands on the same deadline.
    fn cmd_expire(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'EXPIRE' command");
        }

        let key = match self.get_bytes(&args[0]) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };

        let seconds = match self.get_integer(&args[1]) {
            Some(s) => s,
            None => return RespValue::error("ERR value is not an integer or out of range"),
        };

        let deadline_ms = unix_millis(deadline_after_secs(seconds));
        self.expire_at_millis(key, deadline_ms)
    }

    /// PEXPIREAT key unix-ms
    fn cmd_pexpireat(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR wrong number of arguments for 'PEXPIREAT' command");
        }

        let key = match self.get_bytes(&args[0]) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };

        let deadline_ms = match self.get_integer(&args[1]) {
            Some(ms) => ms.max(0) as u64,
            None => return RespValue::error("ERR value is not an integer or out of range"),
        };

        self.expire_at_millis(key, deadline_ms)
    }

    fn expire_at_millis(&self, key: Bytes, deadline_ms: u64) -> RespValue {
        let result = self.apply_logged(
            || {
                record(&[
                    Bytes::from_static(b"PEXPIREAT"),
                    key.clone(),
                    Bytes::from(deadline_ms.to_string()),
                ])
            },
            || self.storage.expire_at(&key, from_unix_millis(deadline_ms)),
        );

        match result {
            Ok(true) => {
                self.record_changes(1);
                RespValue::integer(1)
            }
            Ok(false) => RespValue::integer(0),
            Err(reply) => reply,
        }
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'TTL' command");
        }

        let key = match self.get_bytes(&args[0]) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };

        match self.storage.ttl(&key) {
            Some(ttl) => RespValue::integer(ttl),
            None => RespValue::integer(-2), // Key doesn't exist
        }
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            RespValue::pong()
        } else {
            match self.get_bytes(&args[0]) {
                Some(msg) => RespValue::bulk_string(msg),
                None => RespValue::pong(),
            }
        }
    }

    /// AUTH password
    fn cmd_auth(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR wrong number of arguments for 'AUTH' command");
        }

        let Some(expected) = &self.password else {
            return RespValue::error(
                "ERR AUTH <password> called without any password configured for the default user",
            );
        };

        match self.get_bytes(&args[0]) {
            Some(given) if given.as_ref() == expected.as_bytes() => RespValue::ok(),
            _ => {
                warn!("Authentication failed");
                RespValue::error("WRONGPASS invalid password")
            }
        }
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'DBSIZE' command");
        }
        RespValue::integer(self.storage.len() as i64)
    }

    /// FLUSHDB
    fn cmd_flushdb(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'FLUSHDB' command");
        }

        let result = self.apply_logged(
            || record(&[Bytes::from_static(b"FLUSHDB")]),
            || self.storage.flush(),
        );

        match result {
            Ok(removed) => {
                self.record_changes(removed as u64);
                RespValue::ok()
            }
            Err(reply) => reply,
        }
    }

    /// SAVE
    fn cmd_save(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'SAVE' command");
        }

        match run_blocking(|| self.snapshots.save(&self.storage)) {
            Ok(_) => RespValue::ok(),
            Err(e) => {
                error!(path = %self.snapshots.path().display(), error = %e, "SAVE failed");
                persistence_error(&e)
            }
        }
    }

    /// BGSAVE
    fn cmd_bgsave(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return RespValue::error("ERR wrong number of arguments for 'BGSAVE' command");
        }

        if let Err(e) = self.snapshots.start_background_save(&self.storage) {
            return persistence_error(&e);
        }

        // The background task runs detached; this writes the same copy now
        if let Err(e) = run_blocking(|| self.snapshots.save(&self.storage)) {
            error!(path = %self.snapshots.path().display(), error = %e, "BGSAVE foreground save failed");
        }
        RespValue::simple_string("Background saving started")
    }
}

/// Uppercased command name from the first element of a request.
fn command_name(value: &RespValue) -> Option<String> {
    match value {
        RespValue::BulkString(s) => std::str::from_utf8(s).ok().map(str::to_uppercase),
        RespValue::SimpleString(s) => Some(s.to_uppercase()),
        _ => None,
    }
}

/// Builds the log record for a command: an array of bulk strings.
fn record(parts: &[Bytes]) -> RespValue {
    RespValue::array(parts.iter().cloned().map(RespValue::bulk_string).collect())
}

fn persistence_error(e: &PersistenceError) -> RespValue {
    RespValue::error(format!("ERR {}", e))
}
