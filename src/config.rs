//! Server Configuration
//!
//! DuraKV reads a Redis-style configuration file: one directive per line,
//! arguments separated by whitespace, blank lines and `#` comments ignored.
//!
//! ```text
//! dir /var/lib/durakv
//! dbfilename dump.rdb
//! save 900 1
//! save 60 10000
//! appendonly yes
//! appendfilename appendonly.aof
//! appendfsync everysec
//! requirepass s3cret
//! client-query-buffer-limit 64mb
//! ```
//!
//! Unknown directives and malformed arguments are skipped with a warning so a
//! single bad line never prevents the server from starting.

use crate::protocol::MAX_BULK_SIZE;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Default snapshot file name
pub const DEFAULT_DBFILENAME: &str = "dump.rdb";

/// Default append-only log file name
pub const DEFAULT_APPENDFILENAME: &str = "appendonly.aof";

/// Default per-connection read buffer cap: one maximal bulk string plus
/// room for the surrounding request headers.
pub const DEFAULT_QUERY_BUFFER_LIMIT: usize = MAX_BULK_SIZE + 64 * 1024;

/// When the append-only log is forced to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FsyncPolicy {
    /// Flush and sync after every logged command, before the reply
    Always,
    /// Flush and sync once per second from the background flusher
    #[default]
    EverySec,
    /// Flush once per second and leave syncing to the OS
    No,
}

impl FromStr for FsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(FsyncPolicy::Always),
            "everysec" => Ok(FsyncPolicy::EverySec),
            "no" => Ok(FsyncPolicy::No),
            other => Err(format!("unknown appendfsync policy '{}'", other)),
        }
    }
}

impl fmt::Display for FsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsyncPolicy::Always => "always",
            FsyncPolicy::EverySec => "everysec",
            FsyncPolicy::No => "no",
        };
        f.write_str(name)
    }
}

/// A `save <seconds> <changes>` trigger: snapshot every `interval` if at
/// least `changes` mutations happened since the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    pub interval: Duration,
    pub changes: u64,
}

/// Parsed server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the snapshot and log files
    pub dir: PathBuf,
    /// Snapshot file name inside `dir`
    pub dbfilename: String,
    /// Whether the append-only log is enabled
    pub appendonly: bool,
    /// Log file name inside `dir`
    pub appendfilename: String,
    /// Log sync policy
    pub appendfsync: FsyncPolicy,
    /// Snapshot triggers, one timer each
    pub save_rules: Vec<SaveRule>,
    /// Password clients must present with AUTH, if any
    pub requirepass: Option<String>,
    /// Unparsed bytes a single connection may buffer before it is dropped
    pub client_query_buffer_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            dbfilename: DEFAULT_DBFILENAME.to_string(),
            appendonly: false,
            appendfilename: DEFAULT_APPENDFILENAME.to_string(),
            appendfsync: FsyncPolicy::default(),
            save_rules: Vec::new(),
            requirepass: None,
            client_query_buffer_limit: DEFAULT_QUERY_BUFFER_LIMIT,
        }
    }
}

impl Config {
    /// Reads and parses a configuration file.
    ///
    /// A missing file yields the defaults. The configured directory is
    /// created if it does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };

        config.ensure_dir()?;
        info!(
            dir = %config.dir.display(),
            appendonly = config.appendonly,
            appendfsync = %config.appendfsync,
            save_rules = config.save_rules.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parses configuration text. Bad lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let args: Vec<&str> = line.split_whitespace().collect();
            if let Err(reason) = config.apply(&args) {
                warn!(line = index + 1, %reason, "Skipping config line");
            }
        }

        config
    }

    /// Applies a single directive.
    fn apply(&mut self, args: &[&str]) -> Result<(), String> {
        let directive = args[0].to_ascii_lowercase();

        match (directive.as_str(), &args[1..]) {
            ("save", [secs, changes]) => {
                let secs: u64 = secs
                    .parse()
                    .map_err(|_| format!("invalid save interval '{}'", secs))?;
                let changes: u64 = changes
                    .parse()
                    .map_err(|_| format!("invalid save change count '{}'", changes))?;
                if secs == 0 {
                    return Err("save interval must be positive".to_string());
                }
                self.save_rules.push(SaveRule {
                    interval: Duration::from_secs(secs),
                    changes,
                });
            }
            ("dir", [dir]) => self.dir = PathBuf::from(dir),
            ("dbfilename", [name]) => self.dbfilename = name.to_string(),
            ("appendfilename", [name]) => self.appendfilename = name.to_string(),
            ("appendonly", [flag]) => {
                self.appendonly = match flag.to_ascii_lowercase().as_str() {
                    "yes" => true,
                    "no" => false,
                    other => return Err(format!("appendonly expects yes|no, got '{}'", other)),
                }
            }
            ("appendfsync", [policy]) => self.appendfsync = policy.parse()?,
            ("requirepass", [password]) => self.requirepass = Some(password.to_string()),
            ("client-query-buffer-limit", [size]) => {
                let limit = parse_memory(size)?;
                if limit == 0 {
                    return Err("client-query-buffer-limit must be positive".to_string());
                }
                self.client_query_buffer_limit = limit;
            }
            (
                "save" | "dir" | "dbfilename" | "appendfilename" | "appendonly" | "appendfsync"
                | "requirepass" | "client-query-buffer-limit",
                _,
            ) => return Err(format!("wrong number of arguments for '{}'", directive)),
            _ => return Err(format!("unknown directive '{}'", directive)),
        }

        Ok(())
    }

    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    /// Full path of the append-only log.
    pub fn aof_path(&self) -> PathBuf {
        self.dir.join(&self.appendfilename)
    }

    /// Creates the data directory if needed.
    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }
}

/// Parses a Redis-style memory size: `1024`, `64kb`, `512mb`, `1gb`.
fn parse_memory(text: &str) -> Result<usize, String> {
    let lower = text.to_ascii_lowercase();
    let (digits, unit) = match lower.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => lower.split_at(split),
        None => (lower.as_str(), ""),
    };
    let multiplier: usize = match unit {
        "" | "b" => 1,
        "k" => 1000,
        "kb" => 1024,
        "m" => 1000 * 1000,
        "mb" => 1024 * 1024,
        "g" => 1000 * 1000 * 1000,
        "gb" => 1024 * 1024 * 1024,
        _ => return Err(format!("invalid memory size '{}'", text)),
    };
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| format!("invalid memory size '{}'", text))
}
