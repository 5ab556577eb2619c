//! RESP Protocol Implementation
//!
//! This module provides the Redis Serialization Protocol codec: every RESP2
//! frame plus the RESP3 additions (null, boolean, double, big number, bulk
//! error, verbatim string, map, attribute, set and push).
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and serialization
//! - `parser`: Incremental parser for incoming RESP data
//!
//! ## Example
//!
//! ```ignore
//! use durakv::protocol::{RespValue, parse_message};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (value, consumed) = parse_message(data).unwrap().unwrap();
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! let bytes = response.serialize()?;
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser, MAX_BULK_SIZE};
pub use types::{EncodeError, NullKind, RespValue};
