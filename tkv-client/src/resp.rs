//! # RESP2 Framing
//!
//! Purpose: Frame proxy requests and parse proxy replies using RESP2. Requests
//! are arrays whose first element names the call; structured arguments (keys,
//! ranges, options) travel as nested arrays.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{BufRead, Read};

use crate::error::{ClientError, ClientResult};

/// Deepest reply nesting accepted. Scan batches use four levels.
const MAX_DEPTH: usize = 8;

/// Largest bulk string accepted.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Initial buffer for a bulk payload; the rest grows as bytes arrive.
const BULK_CHUNK: usize = 64 * 1024;

/// RESP value, used for both requests and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 values.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Bulk string from any byte slice.
    pub fn bulk(data: &[u8]) -> Self {
        RespValue::Bulk(Some(data.to_vec()))
    }

    /// Null bulk string, used for absent optional fields.
    pub fn null() -> Self {
        RespValue::Bulk(None)
    }

    /// Booleans travel as 0/1 integers.
    pub fn boolean(value: bool) -> Self {
        RespValue::Integer(value as i64)
    }
}

/// Encodes a request: `*N` array of the call name followed by its arguments.
pub fn encode_command(name: &[u8], args: &[RespValue], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len() + 1);
    out.extend_from_slice(b"\r\n");
    push_bulk(out, name);
    for arg in args {
        encode_value(arg, out);
    }
}

/// Encodes one RESP value into the provided buffer.
pub fn encode_value(value: &RespValue, out: &mut Vec<u8>) {
    match value {
        RespValue::Simple(text) => {
            out.push(b'+');
            out.extend_from_slice(text);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Error(text) => {
            out.push(b'-');
            out.extend_from_slice(text);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(value) => {
            out.push(b':');
            out.extend_from_slice(value.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Bulk(Some(data)) => push_bulk(out, data),
        RespValue::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
        RespValue::Array(items) => {
            out.push(b'*');
            push_usize(out, items.len());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_value(item, out);
            }
        }
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(reader: &mut R, line: &mut Vec<u8>, depth: usize) -> ClientResult<RespValue> {
    if depth > MAX_DEPTH {
        return Err(ClientError::Protocol);
    }
    read_line(reader, line)?;
    let (&tag, rest) = line.split_first().ok_or(ClientError::Protocol)?;
    match tag {
        b'+' => Ok(RespValue::Simple(rest.to_vec())),
        b'-' => Ok(RespValue::Error(rest.to_vec())),
        b':' => parse_i64(rest).map(RespValue::Integer),
        b'$' => match parse_len(rest)? {
            Some(len) => read_bulk(reader, len).map(|data| RespValue::Bulk(Some(data))),
            None => Ok(RespValue::Bulk(None)),
        },
        b'*' => {
            let len = parse_len(rest)?.unwrap_or(0);
            // Lengths come off the wire; do not trust them for preallocation.
            let mut items = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                items.push(read_value(reader, line, depth + 1)?);
            }
            Ok(RespValue::Array(items))
        }
        _ => Err(ClientError::Protocol),
    }
}

fn push_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    push_usize(out, data.len());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn push_usize(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(value.to_string().as_bytes());
}

/// Payload plus its trailing CRLF.
fn read_bulk<R: BufRead>(reader: &mut R, len: usize) -> ClientResult<Vec<u8>> {
    if len > MAX_BULK_LEN {
        return Err(ClientError::Protocol);
    }
    let mut data = Vec::with_capacity(len.min(BULK_CHUNK));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(ClientError::Protocol);
    }
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if &crlf != b"\r\n" {
        return Err(ClientError::Protocol);
    }
    Ok(data)
}

/// A line without its CRLF.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    reader.read_until(b'\n', buf)?;
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

/// Length header. `-1` means null.
fn parse_len(data: &[u8]) -> ClientResult<Option<usize>> {
    match parse_i64(data)? {
        -1 => Ok(None),
        len if len < 0 => Err(ClientError::Protocol),
        len => Ok(Some(len as usize)),
    }
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ClientError::Protocol)
}
