//! # Blocking Connector
//!
//! Purpose: Table, user, writer, and scanner operations over one proxy
//! session, for callers that are happy to block.
//!
//! ## Design Principles
//! 1. **Shared Session**: The connector and every handle it creates share one
//!    session behind a mutex; the session closes when the last of them is gone.
//! 2. **Dual Inputs**: Names and labels accept text or bytes via `DualValue`.
//! 3. **Close Once**: Writer and scanner handles release their server-side
//!    resource exactly once, explicitly or on drop.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use tkv_common::{
    AuthorizationSet, BatchScanOptions, KeyValue, Mutation, MutationBatch, ScanOptions, TimeType,
    WriterOptions,
};

use crate::connection::{Connection, ConnectionFactory, ConnectionParams};
use crate::error::{ClientError, ClientResult};
use crate::handle::{check_rejections, ScanCursor, Step};
use crate::proxy::{ProxyClient, ResourceId};

/// Blocking entry point bound to one proxy session.
pub struct Connector<C: ProxyClient = Connection> {
    client: Arc<Mutex<C>>,
    token: Bytes,
}

impl Connector<Connection> {
    /// Opens a TCP session and wraps it.
    pub fn open(params: &ConnectionParams, shared_secret: impl Into<Bytes>) -> ClientResult<Self> {
        Ok(Connector::new(Connection::open(params)?, shared_secret))
    }
}

impl<C: ProxyClient> Connector<C> {
    /// Wraps an already open session.
    pub fn new(client: C, shared_secret: impl Into<Bytes>) -> Self {
        Connector {
            client: Arc::new(Mutex::new(client)),
            token: shared_secret.into(),
        }
    }

    /// Opens a session through `factory`.
    pub fn connect<F>(factory: &F, shared_secret: impl Into<Bytes>) -> ClientResult<Self>
    where
        F: ConnectionFactory<Conn = C>,
    {
        Ok(Connector::new(factory.create()?, shared_secret))
    }

    pub fn table_exists(&self, table: &str) -> ClientResult<bool> {
        self.client.lock().table_exists(&self.token, table)
    }

    /// Creates a table. `version_iter` installs the default versioning iterator.
    pub fn create_table(&self, table: &str, version_iter: bool, time_type: TimeType) -> ClientResult<()> {
        self.client
            .lock()
            .create_table(&self.token, table, version_iter, time_type)
    }

    pub fn get_user_authorizations(&self, user: &str) -> ClientResult<AuthorizationSet> {
        self.client.lock().get_user_authorizations(&self.token, user)
    }

    /// Replaces the user's labels with `auths`.
    pub fn change_user_authorizations(&self, user: &str, auths: &AuthorizationSet) -> ClientResult<()> {
        self.client
            .lock()
            .change_user_authorizations(&self.token, user, auths)
    }

    pub fn create_writer(&self, table: &str, opts: &WriterOptions) -> ClientResult<Writer<C>> {
        let id = self.client.lock().create_writer(&self.token, table, opts)?;
        debug!(table, writer = %id, "writer opened");
        Ok(Writer {
            client: Arc::clone(&self.client),
            id,
            closed: false,
        })
    }

    pub fn create_scanner(&self, table: &str, opts: &ScanOptions) -> ClientResult<Scanner<C>> {
        let id = self.client.lock().create_scanner(&self.token, table, opts)?;
        debug!(table, scanner = %id, "scanner opened");
        Ok(Scanner::new(Arc::clone(&self.client), id, opts.buffer_size))
    }

    /// Creates a scanner over several ranges; records come back unordered.
    pub fn create_batch_scanner(&self, table: &str, opts: &BatchScanOptions) -> ClientResult<Scanner<C>> {
        let id = self
            .client
            .lock()
            .create_batch_scanner(&self.token, table, opts)?;
        debug!(table, scanner = %id, "batch scanner opened");
        Ok(Scanner::new(Arc::clone(&self.client), id, None))
    }

    /// Closes the session now. Open handles fail on their next call.
    pub fn close(&self) {
        self.client.lock().close();
    }
}

/// Buffered writer for one table.
pub struct Writer<C: ProxyClient = Connection> {
    client: Arc<Mutex<C>>,
    id: ResourceId,
    closed: bool,
}

impl<C: ProxyClient> Writer<C> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends the mutations grouped by row.
    ///
    /// Fails with `ClientError::Write` carrying exactly the mutations the
    /// server rejected; the others were accepted.
    pub fn add_mutations<I>(&mut self, mutations: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = Mutation>,
    {
        self.ensure_open()?;
        let mutations: Vec<Mutation> = mutations.into_iter().collect();
        if mutations.is_empty() {
            return Ok(());
        }
        let batch = MutationBatch::new(&mutations);
        let rejected = self.client.lock().update(&self.id, &batch)?;
        check_rejections(&batch, &mutations, &rejected)
    }

    pub fn add_mutation(&mut self, mutation: Mutation) -> ClientResult<()> {
        self.add_mutations(std::iter::once(mutation))
    }

    pub fn flush(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        self.client.lock().flush(&self.id)
    }

    /// Flushes and releases the server-side writer. Later calls are no-ops.
    pub fn close(&mut self) -> ClientResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.client.lock().close_writer(&self.id)
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed {
            return Err(ClientError::WriterClosed);
        }
        Ok(())
    }
}

impl<C: ProxyClient> Drop for Writer<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(writer = %self.id, error = %err, "failed to close writer on drop");
        }
    }
}

/// Forward-only scanner. Also an iterator of `ClientResult<KeyValue>`.
pub struct Scanner<C: ProxyClient = Connection> {
    client: Arc<Mutex<C>>,
    cursor: ScanCursor,
    // Iteration stops after the first error.
    fused: bool,
}

impl<C: ProxyClient> Scanner<C> {
    fn new(client: Arc<Mutex<C>>, id: ResourceId, batch_size: Option<usize>) -> Self {
        Scanner {
            client,
            cursor: ScanCursor::new(id, batch_size),
            fused: false,
        }
    }

    pub fn id(&self) -> &str {
        self.cursor.id()
    }

    /// Records requested per fetch.
    pub fn batch_size(&self) -> usize {
        self.cursor.batch_size()
    }

    /// True once `close` ran, explicitly or from `Drop`.
    pub fn is_closed(&self) -> bool {
        self.cursor.is_closed()
    }

    /// Next record, or `None` at the end of the scan.
    ///
    /// Fails with `ScannerClosed` once the end was reported or after `close`.
    pub fn next_entry(&mut self) -> ClientResult<Option<KeyValue>> {
        loop {
            match self.cursor.step()? {
                Step::Ready(record) => return Ok(Some(record)),
                Step::Fetch => self.fetch()?,
                Step::End => return Ok(None),
            }
        }
    }

    /// Next non-empty run of records, or `None` at the end of the scan.
    pub fn next_batch(&mut self) -> ClientResult<Option<Vec<KeyValue>>> {
        loop {
            match self.cursor.step_batch()? {
                Step::Ready(records) => return Ok(Some(records)),
                Step::Fetch => self.fetch()?,
                Step::End => return Ok(None),
            }
        }
    }

    fn fetch(&mut self) -> ClientResult<()> {
        let batch = self
            .client
            .lock()
            .next_k(self.cursor.id(), self.cursor.batch_size())?;
        self.cursor.absorb(batch);
        Ok(())
    }

    /// Releases the server-side scanner. Later calls are no-ops.
    pub fn close(&mut self) -> ClientResult<()> {
        if !self.cursor.begin_close() {
            return Ok(());
        }
        self.client.lock().close_scanner(self.cursor.id())
    }
}

impl<C: ProxyClient> Iterator for Scanner<C> {
    type Item = ClientResult<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.next_entry() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => {
                self.fused = true;
                Some(Err(err))
            }
        }
    }
}

impl<C: ProxyClient> Drop for Scanner<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(scanner = %self.cursor.id(), error = %err, "failed to close scanner on drop");
        }
    }
}
