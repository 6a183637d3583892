//! # Client Errors
//!
//! One error type for every client surface. Codec failures are raised before
//! any I/O; transport and server failures propagate unchanged to the caller of
//! the blocking connector or of `ConnectionPool::run`.

use thiserror::Error;

use tkv_common::{CodecError, Mutation};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while connecting, reading, or writing.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The proxy refused or botched the session handshake.
    #[error("connection handshake failed: {0}")]
    Handshake(String),

    /// RESP framing or parse error.
    #[error("protocol error")]
    Protocol,

    /// The proxy rejected the shared secret.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Proxy returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },

    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Address could not be resolved into a socket address.
    #[error("invalid address")]
    InvalidAddress,

    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),

    /// Encoding or decoding of record data failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The proxy rejected part of a batch append.
    #[error("{} mutation(s) rejected", .rejected.len())]
    Write { rejected: Vec<Mutation> },

    /// The scanner was closed or already exhausted.
    #[error("scanner is closed")]
    ScannerClosed,

    /// The writer was already closed.
    #[error("writer is closed")]
    WriterClosed,

    /// No connection became idle before the borrow deadline.
    #[error("timed out waiting for a pooled connection")]
    PoolExhaustedTimeout,

    /// The pool was closed.
    #[error("connection pool closed")]
    PoolClosed,

    /// A worker failed before producing a result.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl ClientError {
    /// Returns true for failures that leave the connection in an unknown state.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Handshake(_) | ClientError::Protocol
        )
    }
}
