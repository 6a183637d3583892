//! # Codec Errors
//!
//! Failures raised while turning caller input into wire bytes or while reading
//! decoded records. All of them happen before (or without) any network call.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors produced by the record codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A dynamic input was neither text nor a byte sequence.
    #[error("invalid value type: expected text or bytes, found {found}")]
    InvalidValueType { found: &'static str },

    /// The text view of a record field is not valid UTF-8.
    #[error("value is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A packed value ended early or carried a negative length.
    #[error("malformed packed value: {0}")]
    Malformed(&'static str),
}
