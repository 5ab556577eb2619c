//! Storage Engine Module
//!
//! This module provides the in-memory keyspace for DuraKV: a thread-safe
//! map of binary keys to records carrying an optional deadline and access
//! metadata.
//!
//! ## Features
//!
//! - **Single RwLock**: Concurrent readers, one writer at a time
//! - **TTL Support**: Keys can carry an absolute expiry deadline
//! - **Lazy Expiry**: Expired keys are only evicted when `TTL` looks at them
//! - **Deep Copies**: `snapshot()` hands persistence an isolated copy
//!
//! ## Example
//!
//! ```
//! use durakv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::time::{Duration, SystemTime};
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("session"), Bytes::from("token123"));
//! engine.expire_at(&Bytes::from("session"), SystemTime::now() + Duration::from_secs(3600));
//!
//! let ttl = engine.ttl(&Bytes::from("session")).unwrap();
//! assert!(ttl > 3500);
//! ```

pub mod engine;

pub use engine::{deadline_after_secs, from_unix_millis, unix_millis, Entry, StorageEngine};
