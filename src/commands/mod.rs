//! Command Handler Module
//!
//! This module implements the command processing layer for DuraKV.
//! It receives parsed RESP commands, executes them against the storage engine,
//! records mutations for durability, and returns appropriate responses.
//!
//! ## Architecture
//!
//! ```text
//! Client Request / Log Record
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Log + Apply  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `SET`, `GET`, `DEL`, `EXISTS`, `KEYS`
//! - `EXPIRE`, `PEXPIREAT`, `TTL`
//! - `PING`, `AUTH`, `COMMAND`, `DBSIZE`, `FLUSHDB`
//! - `SAVE`, `BGSAVE`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
