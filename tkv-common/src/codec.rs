//! # Record Codec
//!
//! Purpose: Accept row, column, visibility, and value fields as either text or
//! raw bytes, and always produce one canonical byte encoding for the wire.
//! Read paths wrap wire bytes in a [`DualView`] exposing both forms.
//!
//! ## Design Principles
//! 1. **Tagged Input**: `DualValue` is an explicit enum, never an implicit coercion.
//! 2. **Zero-Copy Output**: Encoding moves the owned buffer into `Bytes`.
//! 3. **Lazy Text**: `DualView::as_text` validates UTF-8 only when called, so
//!    binary-only readers never pay for (or fail on) text validation.

use std::fmt;

use bytes::Bytes;
use serde_json::Value as JsonValue;

use crate::error::{CodecError, CodecResult};

/// A caller-supplied value in text or binary form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DualValue {
    /// Human-readable text, encoded as UTF-8.
    Text(String),
    /// Raw bytes, passed through unchanged.
    Binary(Vec<u8>),
}

impl DualValue {
    /// Consumes the value and returns its canonical encoding.
    pub fn encode(self) -> Bytes {
        match self {
            DualValue::Text(text) => Bytes::from(text.into_bytes()),
            DualValue::Binary(data) => Bytes::from(data),
        }
    }

    /// Borrows the canonical encoding without consuming the value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DualValue::Text(text) => text.as_bytes(),
            DualValue::Binary(data) => data,
        }
    }
}

impl From<&str> for DualValue {
    fn from(value: &str) -> Self {
        DualValue::Text(value.to_string())
    }
}

impl From<String> for DualValue {
    fn from(value: String) -> Self {
        DualValue::Text(value)
    }
}

impl From<&String> for DualValue {
    fn from(value: &String) -> Self {
        DualValue::Text(value.clone())
    }
}

impl From<&[u8]> for DualValue {
    fn from(value: &[u8]) -> Self {
        DualValue::Binary(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for DualValue {
    fn from(value: &[u8; N]) -> Self {
        DualValue::Binary(value.to_vec())
    }
}

impl From<Vec<u8>> for DualValue {
    fn from(value: Vec<u8>) -> Self {
        DualValue::Binary(value)
    }
}

impl From<Bytes> for DualValue {
    fn from(value: Bytes) -> Self {
        DualValue::Binary(value.to_vec())
    }
}

/// Dynamic input (config files, JSON payloads) is the one place a value can be
/// neither text nor bytes. Strings map to text and arrays of `0..=255`
/// integers map to bytes; everything else is rejected.
impl TryFrom<JsonValue> for DualValue {
    type Error = CodecError;

    fn try_from(value: JsonValue) -> CodecResult<Self> {
        match value {
            JsonValue::String(text) => Ok(DualValue::Text(text)),
            JsonValue::Array(items) => {
                let mut data = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_u64() {
                        Some(byte) if byte <= u8::MAX as u64 => data.push(byte as u8),
                        _ => return Err(CodecError::InvalidValueType { found: "array" }),
                    }
                }
                Ok(DualValue::Binary(data))
            }
            other => Err(CodecError::InvalidValueType {
                found: json_kind(&other),
            }),
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Encodes a dual value into its canonical bytes.
pub fn encode(value: impl Into<DualValue>) -> Bytes {
    value.into().encode()
}

/// Encodes an optional dual value, keeping `None` as `None`.
pub fn encode_opt<V: Into<DualValue>>(value: Option<V>) -> Option<Bytes> {
    value.map(encode)
}

/// Wraps wire bytes in a dual view.
pub fn decode_dual(bytes: impl Into<Bytes>) -> DualView {
    DualView::new(bytes.into())
}

/// Read-side view over canonical bytes.
///
/// `as_bytes` never fails. `as_text` runs UTF-8 validation on demand and
/// reports non-text data as `CodecError::Utf8` without affecting the scan that
/// produced the record.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DualView {
    bytes: Bytes,
}

impl DualView {
    /// Creates a view over the provided bytes.
    pub fn new(bytes: Bytes) -> Self {
        DualView { bytes }
    }

    /// Returns the binary form.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the text form, validating UTF-8 on access.
    pub fn as_text(&self) -> CodecResult<&str> {
        Ok(std::str::from_utf8(&self.bytes)?)
    }

    /// Returns a cheap clone of the underlying buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Returns the length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true when the view holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Bytes> for DualView {
    fn from(bytes: Bytes) -> Self {
        DualView::new(bytes)
    }
}

impl fmt::Debug for DualView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DualView({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
