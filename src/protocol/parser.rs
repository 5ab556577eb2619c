//! Zero-Copy RESP Protocol Parser
//!
//! This module implements an incremental parser for RESP2 and RESP3 frames.
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((value, consumed)))` - Successfully parsed a value, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the message is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! This design allows the caller to:
//! 1. Append incoming network data to a buffer
//! 2. Call `parse()` to attempt parsing
//! 3. If successful, advance the buffer by `consumed` bytes
//! 4. If incomplete, wait for more data
//! 5. If error, handle or disconnect the client
//!
//! A caller that keeps reading until a frame completes gets the blocking
//! "decode one frame" behaviour: the amount read is bounded only by the
//! lengths and counts the frame itself declares.

use crate::protocol::types::{is_big_number, prefix, NullKind, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Unknown type prefix byte
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk length is negative (but not -1 for null)
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Aggregate count is negative (but not -1 for null)
    #[error("invalid aggregate length: {0}")]
    InvalidArrayLength(i64),

    /// Boolean payload other than `t` or `f`
    #[error("invalid boolean: {0:?}")]
    InvalidBoolean(String),

    /// Double payload that is neither a float nor inf/-inf/nan
    #[error("invalid double: {0:?}")]
    InvalidDouble(String),

    /// Big number payload with characters other than a sign and digits
    #[error("invalid big number: {0:?}")]
    InvalidBigNumber(String),

    /// Verbatim string without a `fmt:` header
    #[error("invalid verbatim string: {0}")]
    InvalidVerbatim(String),

    /// Map or attribute key that is not a string frame
    #[error("map key must be a string, got {0}")]
    InvalidMapKey(String),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The message exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Upper bound on capacity reserved up front for a declared element count.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// A zero-copy RESP protocol parser.
///
/// # Example
///
/// ```ignore
/// use durakv::protocol::parser::RespParser;
/// use bytes::BytesMut;
///
/// let mut parser = RespParser::new();
/// let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
///
/// if let Some((value, consumed)) = parser.parse(&buffer)? {
///     buffer.advance(consumed);
///     println!("Parsed: {:?}", value);
/// }
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    /// Current nesting depth (for aggregate parsing)
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse a RESP value from the buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((value, consumed)))` - Successfully parsed a value
    /// - `Ok(None)` - Incomplete data, need more bytes
    /// - `Err(e)` - Parse error
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    /// Internal recursive parsing function.
    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => parse_text(buf, RespValue::SimpleString),
            prefix::ERROR => parse_text(buf, RespValue::Error),
            prefix::INTEGER => parse_integer(buf),
            prefix::NULL => parse_nil(buf),
            prefix::BOOLEAN => parse_boolean(buf),
            prefix::DOUBLE => parse_double(buf),
            prefix::BIG_NUMBER => parse_big_number(buf),
            prefix::BULK_STRING => {
                parse_bulk(buf, NullKind::BulkString, |data| Ok(RespValue::BulkString(data)))
            }
            prefix::BULK_ERROR => {
                parse_bulk(buf, NullKind::BulkError, |data| Ok(RespValue::BulkError(data)))
            }
            prefix::VERBATIM => parse_bulk(buf, NullKind::Verbatim, verbatim_from_payload),
            prefix::ARRAY => self.parse_sequence(buf, NullKind::Array, RespValue::Array),
            prefix::SET => self.parse_sequence(buf, NullKind::Set, RespValue::Set),
            prefix::PUSH => self.parse_sequence(buf, NullKind::Push, RespValue::Push),
            prefix::MAP => self.parse_pairs(buf, NullKind::Map, RespValue::Map),
            prefix::ATTRIBUTE => self.parse_pairs(buf, NullKind::Attribute, RespValue::Attribute),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses `<prefix><count>\r\n<elements...>` for arrays, sets and pushes.
    fn parse_sequence(
        &mut self,
        buf: &[u8],
        null_kind: NullKind,
        build: fn(Vec<RespValue>) -> RespValue,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, header_len) = match parse_count(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        match count {
            None => Ok(Some((RespValue::Null(null_kind), header_len))),
            Some(count) => Ok(self
                .parse_elements(buf, header_len, count)?
                .map(|(elements, consumed)| (build(elements), consumed))),
        }
    }

    /// Parses `<prefix><pairs>\r\n<key><value>...` for maps and attributes.
    fn parse_pairs(
        &mut self,
        buf: &[u8],
        null_kind: NullKind,
        build: fn(Vec<(String, RespValue)>) -> RespValue,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, header_len) = match parse_count(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        let pairs = match count {
            None => return Ok(Some((RespValue::Null(null_kind), header_len))),
            Some(pairs) => pairs,
        };

        let element_count = pairs
            .checked_mul(2)
            .ok_or(ParseError::InvalidArrayLength(pairs as i64))?;

        let (elements, consumed) = match self.parse_elements(buf, header_len, element_count)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        let mut entries = Vec::with_capacity(pairs.min(MAX_PREALLOCATED_ELEMENTS));
        let mut iter = elements.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let key = match key {
                RespValue::SimpleString(s) => s,
                RespValue::BulkString(b) => String::from_utf8(b.to_vec())
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?,
                other => return Err(ParseError::InvalidMapKey(format!("{:?}", other))),
            };
            entries.push((key, value));
        }

        Ok(Some((build(entries), consumed)))
    }

    /// Parses `count` consecutive frames starting at `offset`.
    fn parse_elements(
        &mut self,
        buf: &[u8],
        offset: usize,
        count: usize,
    ) -> ParseResult<Option<(Vec<RespValue>, usize)>> {
        let mut elements = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        let mut consumed = offset;

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                self.depth -= 1;
                return Ok(None);
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => {
                    self.depth -= 1;
                    return Ok(None);
                }
            }
        }

        self.depth -= 1;

        Ok(Some((elements, consumed)))
    }
}

/// Reads the header line after the prefix byte.
///
/// Returns the line content and the number of bytes consumed including the
/// prefix and the CRLF.
fn header_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    match find_crlf(&buf[1..])? {
        Some(pos) => Ok(Some((&buf[1..1 + pos], 1 + pos + 2))),
        None => Ok(None),
    }
}

fn header_str(content: &[u8]) -> ParseResult<&str> {
    std::str::from_utf8(content).map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn parse_i64(content: &[u8]) -> ParseResult<i64> {
    header_str(content)?
        .parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Parses `+<string>\r\n` and `-<message>\r\n`.
fn parse_text(
    buf: &[u8],
    build: fn(String) -> RespValue,
) -> ParseResult<Option<(RespValue, usize)>> {
    match header_line(buf)? {
        Some((content, consumed)) => {
            let s = header_str(content)?;
            Ok(Some((build(s.to_string()), consumed)))
        }
        None => Ok(None),
    }
}

/// Parses an integer: `:<integer>\r\n`
fn parse_integer(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    match header_line(buf)? {
        Some((content, consumed)) => Ok(Some((RespValue::Integer(parse_i64(content)?), consumed))),
        None => Ok(None),
    }
}

/// Parses the RESP3 null: `_\r\n`
fn parse_nil(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    match header_line(buf)? {
        Some((content, consumed)) if content.is_empty() => Ok(Some((RespValue::Nil, consumed))),
        Some((content, _)) => Err(ParseError::ProtocolError(format!(
            "null frame carries payload: {:?}",
            String::from_utf8_lossy(content)
        ))),
        None => Ok(None),
    }
}

/// Parses a boolean: `#t\r\n` or `#f\r\n`
fn parse_boolean(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    match header_line(buf)? {
        Some((b"t", consumed)) => Ok(Some((RespValue::Boolean(true), consumed))),
        Some((b"f", consumed)) => Ok(Some((RespValue::Boolean(false), consumed))),
        Some((content, _)) => Err(ParseError::InvalidBoolean(
            String::from_utf8_lossy(content).into_owned(),
        )),
        None => Ok(None),
    }
}

/// Parses a double: `,<float>\r\n`. The special tokens are case-insensitive.
fn parse_double(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let (content, consumed) = match header_line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let text = header_str(content)?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        "nan" => f64::NAN,
        _ => text
            .parse::<f64>()
            .map_err(|_| ParseError::InvalidDouble(text.to_string()))?,
    };

    Ok(Some((RespValue::Double(value), consumed)))
}

/// Parses a big number: `(<sign?><digits>\r\n`
fn parse_big_number(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    match header_line(buf)? {
        Some((content, consumed)) => {
            let text = header_str(content)?;
            if !is_big_number(content) {
                return Err(ParseError::InvalidBigNumber(text.to_string()));
            }
            Ok(Some((RespValue::BigNumber(text.to_string()), consumed)))
        }
        None => Ok(None),
    }
}

/// Parses `<prefix><length>\r\n<data>\r\n`, shared by `$`, `!` and `=`.
fn parse_bulk(
    buf: &[u8],
    null_kind: NullKind,
    build: fn(Bytes) -> ParseResult<RespValue>,
) -> ParseResult<Option<(RespValue, usize)>> {
    let (content, header_len) = match header_line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let length = parse_i64(content)?;

    if length == -1 {
        return Ok(Some((RespValue::Null(null_kind), header_len)));
    }

    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;

    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total_needed = header_len + length + 2;
    if buf.len() < total_needed {
        return Ok(None);
    }

    if &buf[header_len + length..total_needed] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk payload missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);

    Ok(Some((build(data)?, total_needed)))
}

/// Splits a verbatim payload into its `fmt:` header and the text.
fn verbatim_from_payload(data: Bytes) -> ParseResult<RespValue> {
    if data.len() < 4 || data[3] != b':' {
        return Err(ParseError::InvalidVerbatim(
            "payload must start with a three byte format and ':'".to_string(),
        ));
    }

    let format = header_str(&data[..3])?.to_string();
    Ok(RespValue::Verbatim {
        format,
        text: data.slice(4..),
    })
}

/// Parses an aggregate header, `None` count meaning the `-1` null form.
fn parse_count(buf: &[u8]) -> ParseResult<Option<(Option<usize>, usize)>> {
    let (content, header_len) = match header_line(buf)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let count = parse_i64(content)?;
    match count {
        -1 => Ok(Some((None, header_len))),
        n if n < 0 => Err(ParseError::InvalidArrayLength(n)),
        n => Ok(Some((Some(n as usize), header_len))),
    }
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if no line feed has
/// arrived yet. A line feed without a preceding carriage return is an error.
#[inline]
fn find_crlf(buf: &[u8]) -> ParseResult<Option<usize>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(0) => Err(ParseError::ProtocolError(
            "line not terminated by CRLF".to_string(),
        )),
        Some(i) if buf[i - 1] == b'\r' => Ok(Some(i - 1)),
        Some(_) => Err(ParseError::ProtocolError(
            "line not terminated by CRLF".to_string(),
        )),
        None => Ok(None),
    }
}

/// Helper function to parse a single RESP message from bytes.
///
/// This is a convenience function for simple use cases.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: RespValue) {
        let serialized = value.serialize().unwrap();
        let (parsed, consumed) = parse_message(&serialized).unwrap().unwrap();
        assert_eq!(parsed, value);
        assert_eq!(consumed, serialized.len());
    }

    #[test]
    fn test_parse_simple_string() {
        let input = b"+OK\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::SimpleString("OK".to_string()));
        assert_eq!(result.1, 5);
    }

    #[test]
    fn test_parse_simple_string_incomplete() {
        let input = b"+OK";
        assert!(parse_message(input).unwrap().is_none());
    }

    #[test]
    fn test_parse_error() {
        let input = b"-ERR unknown command\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::Error("ERR unknown command".to_string())
        );
        assert_eq!(result.1, 22);
    }

    #[test]
    fn test_parse_integer() {
        let input = b":1000\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Integer(1000));
        assert_eq!(result.1, 7);
    }

    #[test]
    fn test_parse_negative_integer() {
        let input = b":-42\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Integer(-42));
    }

    #[test]
    fn test_parse_bulk_string() {
        let input = b"$5\r\nhello\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::BulkString(Bytes::from("hello")));
        assert_eq!(result.1, 11);
    }

    #[test]
    fn test_parse_null_bulk_string() {
        let input = b"$-1\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::null());
        assert_eq!(result.1, 5);
    }

    #[test]
    fn test_parse_bulk_length_below_null_rejected() {
        assert_eq!(
            parse_message(b"$-2\r\n"),
            Err(ParseError::InvalidBulkLength(-2))
        );
        assert_eq!(
            parse_message(b"*-5\r\n"),
            Err(ParseError::InvalidArrayLength(-5))
        );
    }

    #[test]
    fn test_parse_empty_bulk_string() {
        let input = b"$0\r\n\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::BulkString(Bytes::from("")));
        assert_eq!(result.1, 6);
    }

    #[test]
    fn test_parse_bulk_string_incomplete() {
        let input = b"$5\r\nhel";
        assert!(parse_message(input).unwrap().is_none());
    }

    #[test]
    fn test_parse_bulk_string_bad_trailer() {
        let input = b"$5\r\nhelloXY";
        assert!(matches!(
            parse_message(input),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_parse_missing_carriage_return() {
        assert!(matches!(
            parse_message(b"+OK\n"),
            Err(ParseError::ProtocolError(_))
        ));
        assert!(matches!(
            parse_message(b"*1\n$4\r\nPING\r\n"),
            Err(ParseError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_parse_array() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("GET")),
                RespValue::BulkString(Bytes::from("name")),
            ])
        );
        assert_eq!(result.1, 23);
    }

    #[test]
    fn test_parse_null_array() {
        let input = b"*-1\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::null_array());
        assert_ne!(result.0, RespValue::null());
    }

    #[test]
    fn test_parse_empty_array() {
        let input = b"*0\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(result.0, RespValue::Array(vec![]));
    }

    #[test]
    fn test_parse_nested_array() {
        let input = b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Integer(2), RespValue::Integer(3),]),
            ])
        );
    }

    #[test]
    fn test_parse_nested_array_incomplete() {
        let input = b"*2\r\n:1\r\n*2\r\n:2\r\n";
        assert!(parse_message(input).unwrap().is_none());
    }

    #[test]
    fn test_parse_unknown_prefix() {
        let input = b"@invalid\r\n";
        assert_eq!(parse_message(input), Err(ParseError::UnknownPrefix(b'@')));
    }

    #[test]
    fn test_parse_invalid_integer() {
        let input = b":not_a_number\r\n";
        let result = parse_message(input);
        assert!(matches!(result, Err(ParseError::InvalidInteger(_))));
    }

    #[test]
    fn test_parse_resp3_scalars() {
        assert_eq!(parse_message(b"_\r\n").unwrap().unwrap().0, RespValue::Nil);
        assert_eq!(
            parse_message(b"#t\r\n").unwrap().unwrap().0,
            RespValue::Boolean(true)
        );
        assert_eq!(
            parse_message(b",3.25\r\n").unwrap().unwrap().0,
            RespValue::Double(3.25)
        );
        assert_eq!(
            parse_message(b"(+12345678901234567890123\r\n").unwrap().unwrap().0,
            RespValue::BigNumber("+12345678901234567890123".into())
        );
        assert!(matches!(
            parse_message(b"#x\r\n"),
            Err(ParseError::InvalidBoolean(_))
        ));
        assert!(matches!(
            parse_message(b"(12x\r\n"),
            Err(ParseError::InvalidBigNumber(_))
        ));
    }

    #[test]
    fn test_parse_double_specials_case_insensitive() {
        for (input, expected) in [
            (&b",INF\r\n"[..], f64::INFINITY),
            (&b",-Inf\r\n"[..], f64::NEG_INFINITY),
        ] {
            assert_eq!(
                parse_message(input).unwrap().unwrap().0,
                RespValue::Double(expected)
            );
        }
        let (value, _) = parse_message(b",NaN\r\n").unwrap().unwrap();
        assert!(matches!(value, RespValue::Double(d) if d.is_nan()));
        assert!(matches!(
            parse_message(b",abc\r\n"),
            Err(ParseError::InvalidDouble(_))
        ));
    }

    #[test]
    fn test_parse_map_with_simple_keys() {
        let input = b"%2\r\n+first\r\n:1\r\n$6\r\nsecond\r\n#f\r\n";
        let (value, consumed) = parse_message(input).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Map(vec![
                ("first".to_string(), RespValue::Integer(1)),
                ("second".to_string(), RespValue::Boolean(false)),
            ])
        );
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_map_rejects_non_string_key() {
        let input = b"%1\r\n:1\r\n:2\r\n";
        assert!(matches!(
            parse_message(input),
            Err(ParseError::InvalidMapKey(_))
        ));
    }

    #[test]
    fn test_parse_verbatim_string() {
        let input = b"=15\r\ntxt:Some string\r\n";
        let (value, _) = parse_message(input).unwrap().unwrap();
        assert_eq!(value, RespValue::verbatim("txt", Bytes::from("Some string")));

        assert!(matches!(
            parse_message(b"=5\r\nhello\r\n"),
            Err(ParseError::InvalidVerbatim(_))
        ));
    }

    #[test]
    fn test_roundtrip_all_frame_types() {
        roundtrip(RespValue::Array(vec![
            RespValue::bulk_string(Bytes::from("SET")),
            RespValue::bulk_string(Bytes::from("key")),
            RespValue::bulk_string(Bytes::from("value")),
        ]));
        roundtrip(RespValue::Push(vec![
            RespValue::simple_string("message"),
            RespValue::Set(vec![RespValue::Integer(7), RespValue::Nil]),
            RespValue::Map(vec![(
                "nested".into(),
                RespValue::Array(vec![RespValue::Double(f64::NAN)]),
            )]),
        ]));
        roundtrip(RespValue::Attribute(vec![(
            "ttl".into(),
            RespValue::Double(f64::NEG_INFINITY),
        )]));
        roundtrip(RespValue::BigNumber("-9".into()));
        roundtrip(RespValue::BigNumber("1000000000000000000000000".into()));
        roundtrip(RespValue::BulkError(Bytes::from("SYNTAX invalid syntax")));
        roundtrip(RespValue::verbatim("mkd", Bytes::from("# title")));
        roundtrip(RespValue::Double(-0.125));
        roundtrip(RespValue::Double(f64::INFINITY));

        for kind in [
            NullKind::BulkString,
            NullKind::Array,
            NullKind::BulkError,
            NullKind::Verbatim,
            NullKind::Map,
            NullKind::Attribute,
            NullKind::Set,
            NullKind::Push,
        ] {
            roundtrip(RespValue::Null(kind));
        }
    }

    #[test]
    fn test_parse_set_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nAriz\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from("SET")),
                RespValue::BulkString(Bytes::from("user:101")),
                RespValue::BulkString(Bytes::from("Ariz")),
            ])
        );
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        // Bulk strings should handle binary data including null bytes
        let input = b"$5\r\nhel\x00o\r\n";
        let result = parse_message(input).unwrap().unwrap();
        assert_eq!(
            result.0,
            RespValue::BulkString(Bytes::from(&b"hel\x00o"[..]))
        );
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut input = Vec::new();
        for _ in 0..(MAX_NESTING_DEPTH + 2) {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert!(matches!(
            parse_message(&input),
            Err(ParseError::ProtocolError(_))
        ));
    }
}
