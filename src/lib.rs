//! # DuraKV - A Durable In-Memory Key-Value Server
//!
//! DuraKV is a Redis-compatible, in-memory key-value server written in Rust.
//! It speaks RESP2 and RESP3 and keeps its data safe across restarts with an
//! append-only log and checksummed snapshots.
//!
//! ## Features
//!
//! - **Redis-Compatible**: Full RESP2 + RESP3 codec and common Redis commands
//! - **Durable**: Append-only log with `always`/`everysec`/`no` fsync policies
//! - **Snapshots**: SHA-256 verified dumps on `SAVE`, `BGSAVE` and `save` rules
//! - **TTL Support**: Per-key deadlines with lazy eviction
//! - **Async I/O**: Built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               DuraKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌─────────────────┐              │
//! │                     │ RESP Codec  │    │  StorageEngine  │              │
//! │                     └─────────────┘    │ RwLock<HashMap> │              │
//! │                                        └────────┬────────┘              │
//! │                                                 │                       │
//! │                        ┌────────────────────────┴─────────────┐         │
//! │                        ▼                                      ▼         │
//! │               ┌─────────────────┐                   ┌────────────────┐  │
//! │               │  AppendOnlyLog  │                   │SnapshotManager │  │
//! │               │  + 1s flusher   │                   │ + rule timers  │  │
//! │               └─────────────────┘                   └────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use durakv::config::Config;
//! use durakv::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("durakv.conf")?;
//!     let server = Server::bind("127.0.0.1:6379", config).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value`, `GET key`, `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `KEYS pattern`
//! - `EXPIRE key seconds`, `PEXPIREAT key unix-ms`, `TTL key`
//! - `PING [message]`, `AUTH password`, `COMMAND`, `DBSIZE`, `FLUSHDB`
//! - `SAVE`, `BGSAVE`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP2/RESP3 parser and types
//! - [`storage`]: Thread-safe storage engine with TTL support
//! - [`persistence`]: Append-only log, snapshots and their timers
//! - [`commands`]: Command dispatch
//! - [`connection`]: Client sessions
//! - [`server`]: Shared server context and accept loop
//! - [`config`]: Configuration file parsing

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::{Config, FsyncPolicy, SaveRule};
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{AppendOnlyLog, PersistenceError, SnapshotManager};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::{Server, ServerContext};
pub use storage::StorageEngine;

/// The default port DuraKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host DuraKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of DuraKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
