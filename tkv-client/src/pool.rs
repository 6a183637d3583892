//! # Connection Pool Executor
//!
//! Purpose: Share a small, bounded set of synchronous proxy sessions among
//! many async callers. Sessions are created lazily up to `capacity`, reused
//! forever, and every blocking call runs on a bounded set of worker threads so
//! the caller's scheduler never blocks.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Fair Waiting**: Capacity is a FIFO semaphore; waiters are served in
//!    request order.
//! 3. **Minimal Locking**: One mutex guards idle/borrowed/created bookkeeping
//!    and is never held across I/O or an await.
//! 4. **RAII Release**: A `Lease` returns its connection when dropped, on the
//!    success path, the error path, and during panic unwinding alike.
//! 5. **Two Bounds**: Connection capacity (proxy budget) and worker count
//!    (blocking parallelism) are configured independently.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! absent --borrow, none idle, created < capacity--> borrowed
//! idle   --borrow-----------------------------------> borrowed
//! borrowed --lease dropped--------------------------> idle
//! borrowed --lease dropped, pool closed or evicted--> closed
//! idle   --pool closed------------------------------> closed
//! ```
//!
//! ## Notes
//! - A connection whose work failed with a transport error goes back to idle
//!   unless `evict_faulted` is set; see `PoolConfig::evict_faulted`.
//! - Dropping a `run` future does not interrupt the dispatched call. The work
//!   finishes on its worker and the lease is released afterwards.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

use crate::async_connector::AsyncConnector;
use crate::connection::{ConnectionFactory, ConnectionParams, TcpConnectionFactory};
use crate::error::{ClientError, ClientResult};
use crate::proxy::ProxyClient;

/// Default number of proxy connections per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// Pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of connections ever alive at once.
    pub capacity: usize,
    /// Maximum blocking calls in flight. Defaults to `capacity`.
    pub max_workers: Option<usize>,
    /// Deadline applied to every borrow made by `run`.
    pub borrow_timeout: Option<Duration>,
    /// Close connections whose work failed with a transport error instead of
    /// returning them to idle. A replacement is created lazily.
    pub evict_faulted: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: DEFAULT_POOL_CAPACITY,
            max_workers: None,
            borrow_timeout: None,
            evict_faulted: false,
        }
    }
}

impl PoolConfig {
    /// Creates a config with the given capacity and defaults elsewhere.
    pub fn with_capacity(capacity: usize) -> Self {
        PoolConfig {
            capacity,
            ..PoolConfig::default()
        }
    }

    /// Rejects zero capacity or zero workers.
    pub fn validate(&self) -> ClientResult<()> {
        if self.capacity == 0 {
            return Err(ClientError::InvalidConfig("pool capacity must be positive"));
        }
        if self.max_workers == Some(0) {
            return Err(ClientError::InvalidConfig("max_workers must be positive"));
        }
        Ok(())
    }

    fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or(self.capacity)
    }
}

/// Point-in-time view of pool bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub created: usize,
    pub idle: usize,
    pub borrowed: usize,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    created: usize,
    borrowed: usize,
    closed: bool,
}

struct Slots<C> {
    state: Mutex<PoolState<C>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    evict_faulted: bool,
}

/// Bounded pool of proxy connections with a blocking-work dispatcher.
///
/// Cloning is cheap and shares the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: Arc<F>,
    slots: Arc<Slots<F::Conn>>,
    workers: Arc<Semaphore>,
    borrow_deadline: Option<Duration>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        ConnectionPool {
            factory: Arc::clone(&self.factory),
            slots: Arc::clone(&self.slots),
            workers: Arc::clone(&self.workers),
            borrow_deadline: self.borrow_deadline,
        }
    }
}

impl ConnectionPool<TcpConnectionFactory> {
    /// Creates a pool of TCP sessions.
    pub fn tcp(params: ConnectionParams, config: PoolConfig) -> ClientResult<Self> {
        Self::new(TcpConnectionFactory::new(params), config)
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Creates an empty pool. No connection is opened until the first borrow.
    pub fn new(factory: F, config: PoolConfig) -> ClientResult<Self> {
        config.validate()?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.capacity),
            created: 0,
            borrowed: 0,
            closed: false,
        };
        Ok(ConnectionPool {
            factory: Arc::new(factory),
            slots: Arc::new(Slots {
                state: Mutex::new(state),
                permits: Arc::new(Semaphore::new(config.capacity)),
                capacity: config.capacity,
                evict_faulted: config.evict_faulted,
            }),
            workers: Arc::new(Semaphore::new(config.worker_count())),
            borrow_deadline: config.borrow_timeout,
        })
    }

    /// Creates an async connector that authenticates calls with `shared_secret`.
    pub fn connector(&self, shared_secret: impl Into<Bytes>) -> AsyncConnector<F> {
        AsyncConnector::new(self.clone(), shared_secret)
    }

    /// Borrows a connection, waiting in FIFO order while the pool is exhausted.
    ///
    /// Reuses the longest-idle connection, or creates one on a worker when
    /// none is idle. A failed creation gives its slot back.
    pub async fn borrow(&self) -> ClientResult<Lease<F::Conn>> {
        if self.slots.permits.available_permits() == 0 {
            trace!(capacity = self.slots.capacity, "pool exhausted, waiting for a connection");
        }
        let permit = Arc::clone(&self.slots.permits)
            .acquire_owned()
            .await
            .map_err(|_| ClientError::PoolClosed)?;

        let reused = {
            let mut state = self.slots.state.lock();
            if state.closed {
                return Err(ClientError::PoolClosed);
            }
            state.borrowed += 1;
            let reused = state.idle.pop_front();
            if reused.is_none() {
                state.created += 1;
            }
            reused
        };

        // An empty lease is a creation reservation; dropping it undoes the
        // bookkeeping. The reservation travels with the create, so a borrow
        // cancelled mid-create leaves the new connection idle.
        let lease = Lease {
            conn: reused,
            slots: Arc::clone(&self.slots),
            faulted: false,
            _permit: permit,
        };
        if lease.conn.is_some() {
            return Ok(lease);
        }
        let factory = Arc::clone(&self.factory);
        let lease = self
            .dispatch(move || {
                let mut lease = lease;
                lease.conn = Some(factory.create()?);
                Ok(lease)
            })
            .await?;
        debug!(created = self.slots.state.lock().created, "pool opened a new connection");
        Ok(lease)
    }

    /// Borrows with a deadline, failing with `PoolExhaustedTimeout`.
    pub async fn borrow_timeout(&self, timeout: Duration) -> ClientResult<Lease<F::Conn>> {
        match tokio::time::timeout(timeout, self.borrow()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::PoolExhaustedTimeout),
        }
    }

    /// Runs a blocking call against a borrowed connection on a worker thread.
    ///
    /// The connection is released once `work` returns or panics. Errors from
    /// `work` propagate unchanged.
    pub async fn run<T, W>(&self, work: W) -> ClientResult<T>
    where
        T: Send + 'static,
        W: FnOnce(&mut F::Conn) -> ClientResult<T> + Send + 'static,
    {
        let lease = match self.borrow_deadline {
            Some(timeout) => self.borrow_timeout(timeout).await?,
            None => self.borrow().await?,
        };
        self.dispatch(move || {
            let mut lease = lease;
            let result = work(&mut *lease);
            if matches!(&result, Err(err) if err.is_connection_error()) {
                lease.mark_faulted();
            }
            result
        })
        .await
    }

    /// Current bookkeeping.
    pub fn status(&self) -> PoolStatus {
        let state = self.slots.state.lock();
        PoolStatus {
            capacity: self.slots.capacity,
            created: state.created,
            idle: state.idle.len(),
            borrowed: state.borrowed,
        }
    }

    /// Closes idle connections and refuses further borrows.
    ///
    /// Borrowed connections are closed when their lease is released.
    pub fn close(&self) {
        self.slots.permits.close();
        self.workers.close();
        let idle: Vec<F::Conn> = {
            let mut state = self.slots.state.lock();
            state.closed = true;
            let idle_count = state.idle.len();
            state.created -= idle_count;
            state.idle.drain(..).collect()
        };
        debug!(closed = idle.len(), "connection pool closed");
        for mut conn in idle {
            conn.close();
        }
    }

    async fn dispatch<T, W>(&self, work: W) -> ClientResult<T>
    where
        T: Send + 'static,
        W: FnOnce() -> ClientResult<T> + Send + 'static,
    {
        let worker = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| ClientError::PoolClosed)?;
        let handle = tokio::task::spawn_blocking(move || {
            let _worker = worker;
            work()
        });
        match handle.await {
            Ok(result) => result,
            Err(err) => Err(ClientError::Worker(err.to_string())),
        }
    }
}

/// A borrowed connection. Dropping it returns the connection to the pool.
pub struct Lease<C: ProxyClient> {
    conn: Option<C>,
    slots: Arc<Slots<C>>,
    faulted: bool,
    // Released after `drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl<C: ProxyClient> Lease<C> {
    /// Flags the connection as broken; honoured when `evict_faulted` is set.
    pub fn mark_faulted(&mut self) {
        self.faulted = true;
    }
}

impl<C: ProxyClient> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("lease holds a connection")
    }
}

impl<C: ProxyClient> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("lease holds a connection")
    }
}

impl<C: ProxyClient> Drop for Lease<C> {
    fn drop(&mut self) {
        let mut state = self.slots.state.lock();
        state.borrowed -= 1;

        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                // Creation never completed.
                state.created -= 1;
                return;
            }
        };

        if state.closed {
            state.created -= 1;
            drop(state);
            conn.close();
            return;
        }

        if self.faulted && self.slots.evict_faulted {
            state.created -= 1;
            drop(state);
            warn!("evicting faulted proxy connection");
            conn.close();
            return;
        }

        state.idle.push_back(conn);
    }
}
