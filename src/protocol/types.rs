//! RESP (Redis Serialization Protocol) Data Types
//!
//! This module defines the frame types of the RESP2 and RESP3 protocols.
//! Every frame starts with a one-byte type prefix and every header line is
//! terminated with CRLF (`\r\n`).
//!
//! ## Protocol Format
//!
//! | Prefix | Type            | Example                          |
//! |--------|-----------------|----------------------------------|
//! | `+`    | Simple String   | `+OK\r\n`                        |
//! | `-`    | Error           | `-ERR unknown command\r\n`       |
//! | `:`    | Integer         | `:1000\r\n`                      |
//! | `$`    | Bulk String     | `$5\r\nhello\r\n`                |
//! | `*`    | Array           | `*1\r\n$4\r\nPING\r\n`           |
//! | `_`    | Null            | `_\r\n`                          |
//! | `#`    | Boolean         | `#t\r\n`                         |
//! | `,`    | Double          | `,3.14\r\n`, `,inf\r\n`          |
//! | `(`    | Big Number      | `(-3492890328409238509\r\n`      |
//! | `!`    | Bulk Error      | `!9\r\nERR oops!\r\n`            |
//! | `=`    | Verbatim String | `=9\r\ntxt:hello\r\n`            |
//! | `%`    | Map             | `%1\r\n+key\r\n:1\r\n`           |
//! | `\|`   | Attribute       | same shape as a map              |
//! | `~`    | Set             | `~2\r\n+a\r\n+b\r\n`             |
//! | `>`    | Push            | same shape as an array           |
//!
//! Length-prefixed and aggregate types have a null form written with a
//! length of `-1` under their own prefix, e.g. `$-1\r\n` or `*-1\r\n`.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
    pub const NULL: u8 = b'_';
    pub const BOOLEAN: u8 = b'#';
    pub const DOUBLE: u8 = b',';
    pub const BIG_NUMBER: u8 = b'(';
    pub const BULK_ERROR: u8 = b'!';
    pub const VERBATIM: u8 = b'=';
    pub const MAP: u8 = b'%';
    pub const ATTRIBUTE: u8 = b'|';
    pub const SET: u8 = b'~';
    pub const PUSH: u8 = b'>';
}

/// The type whose null form a [`RespValue::Null`] represents.
///
/// Each nullable type has its own wire sentinel, so a null bulk string
/// (`$-1`) and a null array (`*-1`) stay distinguishable after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullKind {
    BulkString,
    Array,
    BulkError,
    Verbatim,
    Map,
    Attribute,
    Set,
    Push,
}

impl NullKind {
    /// The type prefix written in front of `-1`.
    pub fn prefix(self) -> u8 {
        match self {
            NullKind::BulkString => prefix::BULK_STRING,
            NullKind::Array => prefix::ARRAY,
            NullKind::BulkError => prefix::BULK_ERROR,
            NullKind::Verbatim => prefix::VERBATIM,
            NullKind::Map => prefix::MAP,
            NullKind::Attribute => prefix::ATTRIBUTE,
            NullKind::Set => prefix::SET,
            NullKind::Push => prefix::PUSH,
        }
    }
}

/// Errors that can occur while serializing a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Simple strings and simple errors cannot carry CR or LF
    #[error("line frame contains CR or LF: {0:?}")]
    LineBreakInSimpleFrame(String),

    /// Big numbers are an optional sign followed by decimal digits
    #[error("invalid big number: {0:?}")]
    InvalidBigNumber(String),

    /// Verbatim format tags are exactly three bytes and cannot contain ':'
    #[error("invalid verbatim format tag: {0:?}")]
    InvalidVerbatimFormat(String),
}

/// Represents a value in the RESP protocol.
///
/// This enum covers all RESP2 and RESP3 data types and is used both for
/// parsing incoming requests and serializing outgoing replies.
#[derive(Debug, Clone)]
pub enum RespValue {
    /// Simple strings are used for non-binary safe strings.
    /// They cannot contain CRLF characters.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Errors are similar to simple strings but indicate an error condition.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integers.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Bulk strings are binary-safe strings up to 512 MB.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Arrays can contain any RESP type, including nested arrays.
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),

    /// Null form of a length-prefixed or aggregate type: `<prefix>-1\r\n`
    Null(NullKind),

    /// RESP3 null: `_\r\n`
    Nil,

    /// Format: `#t\r\n` or `#f\r\n`
    Boolean(bool),

    /// Format: `,<float>\r\n`, with `inf`, `-inf` and `nan` for the specials
    Double(f64),

    /// Arbitrary precision integer kept as its digit string.
    /// Format: `(<sign?><digits>\r\n`
    BigNumber(String),

    /// Binary-safe error. Format: `!<length>\r\n<data>\r\n`
    BulkError(Bytes),

    /// Text with a three byte format tag such as `txt` or `mkd`.
    /// Format: `=<length>\r\n<format>:<text>\r\n`
    Verbatim { format: String, text: Bytes },

    /// Ordered key/value pairs. Format: `%<pairs>\r\n<key><value>...`
    Map(Vec<(String, RespValue)>),

    /// Out-of-band metadata, same wire shape as a map with prefix `|`
    Attribute(Vec<(String, RespValue)>),

    /// Collection of frames. Format: `~<count>\r\n<element>...`
    Set(Vec<RespValue>),

    /// Out-of-band array. Format: `><count>\r\n<element>...`
    Push(Vec<RespValue>),
}

impl PartialEq for RespValue {
    fn eq(&self, other: &Self) -> bool {
        use RespValue::*;

        match (self, other) {
            (SimpleString(a), SimpleString(b)) | (Error(a), Error(b)) => a == b,
            (BigNumber(a), BigNumber(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (BulkString(a), BulkString(b)) | (BulkError(a), BulkError(b)) => a == b,
            (Array(a), Array(b)) | (Set(a), Set(b)) | (Push(a), Push(b)) => a == b,
            (Map(a), Map(b)) | (Attribute(a), Attribute(b)) => a == b,
            (Null(a), Null(b)) => a == b,
            (Nil, Nil) => true,
            (Boolean(a), Boolean(b)) => a == b,
            // NaN compares equal to NaN so decoded frames match their source
            (Double(a), Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (
                Verbatim { format: fa, text: ta },
                Verbatim { format: fb, text: tb },
            ) => fa == fb && ta == tb,
            _ => false,
        }
    }
}

impl RespValue {
    /// Creates a new simple string response.
    ///
    /// # Example
    /// ```
    /// use durakv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error response.
    ///
    /// # Example
    /// ```
    /// use durakv::protocol::types::RespValue;
    /// let err = RespValue::error("ERR unknown command");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates a new integer response.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use durakv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates a null bulk string response (`$-1`).
    pub fn null() -> Self {
        RespValue::Null(NullKind::BulkString)
    }

    /// Creates a null array response (`*-1`).
    pub fn null_array() -> Self {
        RespValue::Null(NullKind::Array)
    }

    /// Creates an array response.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Creates a verbatim string with the given three byte format tag.
    pub fn verbatim(format: impl Into<String>, text: impl Into<Bytes>) -> Self {
        RespValue::Verbatim {
            format: format.into(),
            text: text.into(),
        }
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Common response for PONG
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the RESP value to bytes for sending over the wire.
    pub fn serialize(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf)?;
        Ok(buf)
    }

    /// Serializes the RESP value into an existing buffer.
    ///
    /// On error the buffer may hold a partially written frame.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s)?,
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s)?,
            RespValue::Integer(n) => write_header(buf, prefix::INTEGER, &n.to_string()),
            RespValue::BulkString(data) => write_bulk(buf, prefix::BULK_STRING, data),
            RespValue::BulkError(data) => write_bulk(buf, prefix::BULK_ERROR, data),
            RespValue::Array(values) => write_aggregate(buf, prefix::ARRAY, values)?,
            RespValue::Set(values) => write_aggregate(buf, prefix::SET, values)?,
            RespValue::Push(values) => write_aggregate(buf, prefix::PUSH, values)?,
            RespValue::Map(pairs) => write_pairs(buf, prefix::MAP, pairs)?,
            RespValue::Attribute(pairs) => write_pairs(buf, prefix::ATTRIBUTE, pairs)?,
            RespValue::Null(kind) => write_header(buf, kind.prefix(), "-1"),
            RespValue::Nil => write_header(buf, prefix::NULL, ""),
            RespValue::Boolean(b) => write_header(buf, prefix::BOOLEAN, if *b { "t" } else { "f" }),
            RespValue::Double(d) => write_header(buf, prefix::DOUBLE, &format_double(*d)),
            RespValue::BigNumber(digits) => {
                if !is_big_number(digits.as_bytes()) {
                    return Err(EncodeError::InvalidBigNumber(digits.clone()));
                }
                write_header(buf, prefix::BIG_NUMBER, digits);
            }
            RespValue::Verbatim { format, text } => {
                if format.len() != 3 || format.contains(':') {
                    return Err(EncodeError::InvalidVerbatimFormat(format.clone()));
                }
                write_header(buf, prefix::VERBATIM, &(format.len() + 1 + text.len()).to_string());
                buf.extend_from_slice(format.as_bytes());
                buf.push(b':');
                buf.extend_from_slice(text);
                buf.extend_from_slice(CRLF);
            }
        }
        Ok(())
    }

    /// Returns true if this value is any kind of null.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null(_) | RespValue::Nil)
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_) | RespValue::BulkError(_))
    }

    /// Attempts to extract the inner string from SimpleString or BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Attempts to extract the inner bytes from BulkString.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract the inner array.
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Writes `<prefix><text>\r\n`.
fn write_header(buf: &mut Vec<u8>, prefix: u8, text: &str) {
    buf.push(prefix);
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(CRLF);
}

/// Writes a single-line frame, rejecting embedded line breaks.
fn write_line(buf: &mut Vec<u8>, prefix: u8, text: &str) -> Result<(), EncodeError> {
    if text.contains(['\r', '\n']) {
        return Err(EncodeError::LineBreakInSimpleFrame(text.to_string()));
    }
    write_header(buf, prefix, text);
    Ok(())
}

fn write_bulk(buf: &mut Vec<u8>, prefix: u8, data: &[u8]) {
    write_header(buf, prefix, &data.len().to_string());
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

fn write_aggregate(buf: &mut Vec<u8>, prefix: u8, values: &[RespValue]) -> Result<(), EncodeError> {
    write_header(buf, prefix, &values.len().to_string());
    for value in values {
        value.serialize_into(buf)?;
    }
    Ok(())
}

/// Map keys are always written as bulk strings.
fn write_pairs(
    buf: &mut Vec<u8>,
    prefix: u8,
    pairs: &[(String, RespValue)],
) -> Result<(), EncodeError> {
    write_header(buf, prefix, &pairs.len().to_string());
    for (key, value) in pairs {
        write_bulk(buf, prefix::BULK_STRING, key.as_bytes());
        value.serialize_into(buf)?;
    }
    Ok(())
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "nan".to_string()
    } else if d == f64::INFINITY {
        "inf".to_string()
    } else if d == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        d.to_string()
    }
}

/// Checks the `[+-]?[0-9]+` shape of a big number.
pub(crate) fn is_big_number(data: &[u8]) -> bool {
    let digits = match data.first() {
        Some(b'+') | Some(b'-') => &data[1..],
        _ => data,
    };
    !digits.is_empty() && digits.iter().all(u8::is_ascii_digit)
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) | RespValue::BulkError(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            RespValue::Null(_) | RespValue::Nil => write!(f, "(nil)"),
            RespValue::Boolean(b) => write!(f, "({})", b),
            RespValue::Double(d) => write!(f, "(double) {}", format_double(*d)),
            RespValue::BigNumber(n) => write!(f, "(big number) {}", n),
            RespValue::Verbatim { text, .. } => write!(f, "{}", String::from_utf8_lossy(text)),
            RespValue::Array(values) | RespValue::Set(values) | RespValue::Push(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
            RespValue::Map(pairs) | RespValue::Attribute(pairs) => {
                if pairs.is_empty() {
                    write!(f, "(empty map)")
                } else {
                    writeln!(f)?;
                    for (i, (k, v)) in pairs.iter().enumerate() {
                        writeln!(f, "{}# \"{}\" => {}", i + 1, k, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_serialize() {
        let value = RespValue::simple_string("OK");
        assert_eq!(value.serialize().unwrap(), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = RespValue::error("ERR unknown command");
        assert_eq!(value.serialize().unwrap(), b"-ERR unknown command\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        let value = RespValue::integer(1000);
        assert_eq!(value.serialize().unwrap(), b":1000\r\n");

        let negative = RespValue::integer(-42);
        assert_eq!(negative.serialize().unwrap(), b":-42\r\n");
    }

    #[test]
    fn test_bulk_string_serialize() {
        let value = RespValue::bulk_string(Bytes::from("hello"));
        assert_eq!(value.serialize().unwrap(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_typed_null_serialize() {
        assert_eq!(RespValue::null().serialize().unwrap(), b"$-1\r\n");
        assert_eq!(RespValue::null_array().serialize().unwrap(), b"*-1\r\n");
        assert_eq!(RespValue::Null(NullKind::Map).serialize().unwrap(), b"%-1\r\n");
        assert_eq!(RespValue::Null(NullKind::Set).serialize().unwrap(), b"~-1\r\n");
        assert_eq!(RespValue::Nil.serialize().unwrap(), b"_\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from("GET")),
            RespValue::bulk_string(Bytes::from("name")),
        ]);
        assert_eq!(value.serialize().unwrap(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }

    #[test]
    fn test_nested_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::array(vec![RespValue::integer(2), RespValue::integer(3)]),
        ]);
        assert_eq!(value.serialize().unwrap(), b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n");
    }

    #[test]
    fn test_double_specials_serialize() {
        assert_eq!(RespValue::Double(f64::INFINITY).serialize().unwrap(), b",inf\r\n");
        assert_eq!(RespValue::Double(f64::NEG_INFINITY).serialize().unwrap(), b",-inf\r\n");
        assert_eq!(RespValue::Double(f64::NAN).serialize().unwrap(), b",nan\r\n");
        assert_eq!(RespValue::Double(1.5).serialize().unwrap(), b",1.5\r\n");
    }

    #[test]
    fn test_boolean_and_big_number_serialize() {
        assert_eq!(RespValue::Boolean(true).serialize().unwrap(), b"#t\r\n");
        assert_eq!(RespValue::Boolean(false).serialize().unwrap(), b"#f\r\n");
        assert_eq!(
            RespValue::BigNumber("-123456789012345678901234567890".into())
                .serialize()
                .unwrap(),
            b"(-123456789012345678901234567890\r\n"
        );
    }

    #[test]
    fn test_invalid_big_number_rejected() {
        for bad in ["", "+", "12a4", "1.5", "--1"] {
            assert_eq!(
                RespValue::BigNumber(bad.into()).serialize(),
                Err(EncodeError::InvalidBigNumber(bad.into()))
            );
        }
    }

    #[test]
    fn test_invalid_element_inside_aggregate_rejected() {
        let value = RespValue::Map(vec![(
            "k".into(),
            RespValue::Set(vec![RespValue::BigNumber("x".into())]),
        )]);
        assert!(matches!(value.serialize(), Err(EncodeError::InvalidBigNumber(_))));

        let value = RespValue::array(vec![RespValue::simple_string("a\r\nb")]);
        assert!(matches!(
            value.serialize(),
            Err(EncodeError::LineBreakInSimpleFrame(_))
        ));
    }

    #[test]
    fn test_verbatim_and_map_serialize() {
        let value = RespValue::verbatim("txt", Bytes::from("Some string"));
        assert_eq!(value.serialize().unwrap(), b"=15\r\ntxt:Some string\r\n");

        let value = RespValue::Map(vec![("first".into(), RespValue::integer(1))]);
        assert_eq!(value.serialize().unwrap(), b"%1\r\n$5\r\nfirst\r\n:1\r\n");

        assert!(RespValue::verbatim("text", Bytes::new()).serialize().is_err());
    }

    #[test]
    fn test_nan_equality() {
        assert_eq!(RespValue::Double(f64::NAN), RespValue::Double(f64::NAN));
        assert_ne!(RespValue::Double(1.0), RespValue::Double(f64::NAN));
        assert_ne!(RespValue::null(), RespValue::null_array());
    }

    #[test]
    fn test_ok_response() {
        assert_eq!(RespValue::ok().serialize().unwrap(), b"+OK\r\n");
    }

    #[test]
    fn test_pong_response() {
        assert_eq!(RespValue::pong().serialize().unwrap(), b"+PONG\r\n");
    }
}
