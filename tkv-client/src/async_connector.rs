//! # Async Connector
//!
//! Purpose: The blocking connector surface as `async fn`s. Every operation is
//! one `ConnectionPool::run` call, so a connection is held only for the
//! duration of a single proxy call.
//!
//! ## Design Principles
//! 1. **Delegation**: Each method moves owned arguments into a closure that
//!    calls the matching `ProxyClient` method on a pooled connection.
//! 2. **No Affinity**: Writers and scanners keep only their resource id; each
//!    fetch or update may use a different connection.
//! 3. **Close Once**: Handles release their server-side resource exactly
//!    once. A handle dropped while open schedules the close on the runtime it
//!    was created on.
//!
//! ## Notes
//! - Cancelling `next_entry` or `next_batch` while a fetch is in flight drops
//!   the records of that fetch.

use bytes::Bytes;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use tkv_common::{
    AuthorizationSet, BatchScanOptions, KeyValue, Mutation, MutationBatch, ScanOptions, TimeType,
    WriterOptions,
};

use crate::connection::{ConnectionFactory, TcpConnectionFactory};
use crate::error::{ClientError, ClientResult};
use crate::handle::{check_rejections, ScanCursor, Step};
use crate::pool::ConnectionPool;
use crate::proxy::{ProxyClient, ResourceId};

/// Async entry point backed by a connection pool.
///
/// Cloning is cheap and shares the pool.
pub struct AsyncConnector<F: ConnectionFactory = TcpConnectionFactory> {
    pool: ConnectionPool<F>,
    token: Bytes,
}

impl<F: ConnectionFactory> Clone for AsyncConnector<F> {
    fn clone(&self) -> Self {
        AsyncConnector {
            pool: self.pool.clone(),
            token: self.token.clone(),
        }
    }
}

impl<F: ConnectionFactory> AsyncConnector<F> {
    pub fn new(pool: ConnectionPool<F>, shared_secret: impl Into<Bytes>) -> Self {
        AsyncConnector {
            pool,
            token: shared_secret.into(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<F> {
        &self.pool
    }

    pub async fn table_exists(&self, table: &str) -> ClientResult<bool> {
        let token = self.token.clone();
        let table = table.to_string();
        self.pool.run(move |conn| conn.table_exists(&token, &table)).await
    }

    pub async fn create_table(&self, table: &str, version_iter: bool, time_type: TimeType) -> ClientResult<()> {
        let token = self.token.clone();
        let table = table.to_string();
        self.pool
            .run(move |conn| conn.create_table(&token, &table, version_iter, time_type))
            .await
    }

    pub async fn get_user_authorizations(&self, user: &str) -> ClientResult<AuthorizationSet> {
        let token = self.token.clone();
        let user = user.to_string();
        self.pool
            .run(move |conn| conn.get_user_authorizations(&token, &user))
            .await
    }

    pub async fn change_user_authorizations(&self, user: &str, auths: &AuthorizationSet) -> ClientResult<()> {
        let token = self.token.clone();
        let user = user.to_string();
        let auths = auths.clone();
        self.pool
            .run(move |conn| conn.change_user_authorizations(&token, &user, &auths))
            .await
    }

    pub async fn create_writer(&self, table: &str, opts: &WriterOptions) -> ClientResult<AsyncWriter<F>> {
        let token = self.token.clone();
        let owned_table = table.to_string();
        let opts = opts.clone();
        let id = self
            .pool
            .run(move |conn| conn.create_writer(&token, &owned_table, &opts))
            .await?;
        debug!(table, writer = %id, "async writer opened");
        Ok(AsyncWriter {
            pool: self.pool.clone(),
            id,
            closed: false,
            runtime: Handle::try_current().ok(),
        })
    }

    pub async fn create_scanner(&self, table: &str, opts: &ScanOptions) -> ClientResult<AsyncScanner<F>> {
        let token = self.token.clone();
        let owned_table = table.to_string();
        let batch_size = opts.buffer_size;
        let opts = opts.clone();
        let id = self
            .pool
            .run(move |conn| conn.create_scanner(&token, &owned_table, &opts))
            .await?;
        debug!(table, scanner = %id, "async scanner opened");
        Ok(AsyncScanner::new(self.pool.clone(), id, batch_size))
    }

    pub async fn create_batch_scanner(
        &self,
        table: &str,
        opts: &BatchScanOptions,
    ) -> ClientResult<AsyncScanner<F>> {
        let token = self.token.clone();
        let owned_table = table.to_string();
        let opts = opts.clone();
        let id = self
            .pool
            .run(move |conn| conn.create_batch_scanner(&token, &owned_table, &opts))
            .await?;
        debug!(table, scanner = %id, "async batch scanner opened");
        Ok(AsyncScanner::new(self.pool.clone(), id, None))
    }
}

/// Async counterpart of `Writer`.
pub struct AsyncWriter<F: ConnectionFactory = TcpConnectionFactory> {
    pool: ConnectionPool<F>,
    id: ResourceId,
    closed: bool,
    runtime: Option<Handle>,
}

impl<F: ConnectionFactory> AsyncWriter<F> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sends the mutations grouped by row; see `Writer::add_mutations`.
    pub async fn add_mutations<I>(&mut self, mutations: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = Mutation>,
    {
        self.ensure_open()?;
        let mutations: Vec<Mutation> = mutations.into_iter().collect();
        if mutations.is_empty() {
            return Ok(());
        }
        let id = self.id.clone();
        let batch = MutationBatch::new(&mutations);
        let (batch, rejected) = self
            .pool
            .run(move |conn| {
                let rejected = conn.update(&id, &batch)?;
                Ok((batch, rejected))
            })
            .await?;
        check_rejections(&batch, &mutations, &rejected)
    }

    pub async fn add_mutation(&mut self, mutation: Mutation) -> ClientResult<()> {
        self.add_mutations(std::iter::once(mutation)).await
    }

    pub async fn flush(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        let id = self.id.clone();
        self.pool.run(move |conn| conn.flush(&id)).await
    }

    /// Flushes and releases the server-side writer. Later calls are no-ops.
    pub async fn close(&mut self) -> ClientResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let id = self.id.clone();
        self.pool.run(move |conn| conn.close_writer(&id)).await
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed {
            return Err(ClientError::WriterClosed);
        }
        Ok(())
    }
}

impl<F: ConnectionFactory> Drop for AsyncWriter<F> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let id = std::mem::take(&mut self.id);
        spawn_release(&self.runtime, &self.pool, id, "writer", |conn, id| conn.close_writer(id));
    }
}

/// Async counterpart of `Scanner`.
pub struct AsyncScanner<F: ConnectionFactory = TcpConnectionFactory> {
    pool: ConnectionPool<F>,
    cursor: ScanCursor,
    runtime: Option<Handle>,
}

impl<F: ConnectionFactory> AsyncScanner<F> {
    fn new(pool: ConnectionPool<F>, id: ResourceId, batch_size: Option<usize>) -> Self {
        AsyncScanner {
            pool,
            cursor: ScanCursor::new(id, batch_size),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn id(&self) -> &str {
        self.cursor.id()
    }

    pub fn batch_size(&self) -> usize {
        self.cursor.batch_size()
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_closed()
    }

    /// Next record, or `None` at the end of the scan.
    ///
    /// Fails with `ScannerClosed` once the end was reported or after `close`.
    pub async fn next_entry(&mut self) -> ClientResult<Option<KeyValue>> {
        loop {
            match self.cursor.step()? {
                Step::Ready(record) => return Ok(Some(record)),
                Step::Fetch => self.fetch().await?,
                Step::End => return Ok(None),
            }
        }
    }

    /// Next non-empty run of records, or `None` at the end of the scan.
    pub async fn next_batch(&mut self) -> ClientResult<Option<Vec<KeyValue>>> {
        loop {
            match self.cursor.step_batch()? {
                Step::Ready(records) => return Ok(Some(records)),
                Step::Fetch => self.fetch().await?,
                Step::End => return Ok(None),
            }
        }
    }

    /// Drains the scan into a vector.
    pub async fn collect(&mut self) -> ClientResult<Vec<KeyValue>> {
        let mut records = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            records.extend(batch);
        }
        Ok(records)
    }

    async fn fetch(&mut self) -> ClientResult<()> {
        let id = self.cursor.id().to_string();
        let k = self.cursor.batch_size();
        let batch = self.pool.run(move |conn| conn.next_k(&id, k)).await?;
        self.cursor.absorb(batch);
        Ok(())
    }

    /// Releases the server-side scanner. Later calls are no-ops.
    pub async fn close(&mut self) -> ClientResult<()> {
        if !self.cursor.begin_close() {
            return Ok(());
        }
        let id = self.cursor.id().to_string();
        self.pool.run(move |conn| conn.close_scanner(&id)).await
    }
}

impl<F: ConnectionFactory> Drop for AsyncScanner<F> {
    fn drop(&mut self) {
        if !self.cursor.begin_close() {
            return;
        }
        let id = self.cursor.id().to_string();
        spawn_release(&self.runtime, &self.pool, id, "scanner", |conn, id| conn.close_scanner(id));
    }
}

/// Schedules the close of a handle dropped while still open.
fn spawn_release<F, R>(
    runtime: &Option<Handle>,
    pool: &ConnectionPool<F>,
    id: ResourceId,
    kind: &'static str,
    release: R,
) where
    F: ConnectionFactory,
    R: FnOnce(&mut F::Conn, &str) -> ClientResult<()> + Send + 'static,
{
    let runtime = match runtime {
        Some(runtime) => runtime,
        None => {
            warn!(kind, id = %id, "handle dropped outside a runtime; server resource leaked");
            return;
        }
    };
    let pool = pool.clone();
    runtime.spawn(async move {
        let result = pool.run(move |conn| release(conn, &id)).await;
        if let Err(err) = result {
            warn!(kind, error = %err, "failed to close dropped handle");
        }
    });
}
