//! # Proxy RPC Surface
//!
//! Purpose: Describe the synchronous request/response calls the proxy exposes,
//! independent of how they travel. `Connection` implements this over TCP; the
//! connectors and the pool only ever talk to this trait.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Callers are generic over `ProxyClient`, so an
//!    in-memory proxy can stand in for the network in tests.
//! 2. **Canonical Inputs**: Every argument is already encoded; no text/binary
//!    decisions happen below this line.
//! 3. **Exclusive Use**: Methods take `&mut self`; one call at a time per session.

use tkv_common::{
    AuthorizationSet, BatchScanOptions, KeyValue, MutationBatch, ScanOptions, TimeType, WriterOptions,
};

use crate::error::ClientResult;

/// Server-assigned handle for an open scanner or writer.
pub type ResourceId = String;

/// One fetch from an open scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanBatch {
    /// Records in scan order.
    pub results: Vec<KeyValue>,
    /// False once the server has no further records.
    pub more: bool,
}

/// Synchronous proxy calls.
///
/// `token` is the shared-secret login token carried by every table and user
/// call; resource calls address a server-side handle instead.
pub trait ProxyClient: Send {
    fn table_exists(&mut self, token: &[u8], table: &str) -> ClientResult<bool>;

    fn create_table(
        &mut self,
        token: &[u8],
        table: &str,
        version_iter: bool,
        time_type: TimeType,
    ) -> ClientResult<()>;

    fn get_user_authorizations(&mut self, token: &[u8], user: &str) -> ClientResult<AuthorizationSet>;

    fn change_user_authorizations(
        &mut self,
        token: &[u8],
        user: &str,
        auths: &AuthorizationSet,
    ) -> ClientResult<()>;

    fn create_writer(&mut self, token: &[u8], table: &str, opts: &WriterOptions) -> ClientResult<ResourceId>;

    /// Appends a batch. Returns the flattened positions the server rejected.
    fn update(&mut self, writer: &str, batch: &MutationBatch) -> ClientResult<Vec<usize>>;

    fn flush(&mut self, writer: &str) -> ClientResult<()>;

    /// Flushes and releases the server-side writer.
    fn close_writer(&mut self, writer: &str) -> ClientResult<()>;

    fn create_scanner(&mut self, token: &[u8], table: &str, opts: &ScanOptions) -> ClientResult<ResourceId>;

    fn create_batch_scanner(
        &mut self,
        token: &[u8],
        table: &str,
        opts: &BatchScanOptions,
    ) -> ClientResult<ResourceId>;

    /// Fetches up to `k` records.
    fn next_k(&mut self, scanner: &str, k: usize) -> ClientResult<ScanBatch>;

    fn close_scanner(&mut self, scanner: &str) -> ClientResult<()>;

    /// Closes the session. Idempotent.
    fn close(&mut self);
}
