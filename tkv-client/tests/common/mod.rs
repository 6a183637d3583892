//! Shared helpers for integration tests.
//!
//! `MemoryBackend` is an in-process stand-in for the proxy. Sessions created
//! from it share one table store and one set of counters, so tests can assert
//! on concurrency and close accounting.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use tkv_client::{
    AuthorizationSet, BatchScanOptions, ClientError, ClientResult, KeyValue, MutationBatch, ProxyClient, Range,
    ResourceId, ScanBatch, ScanColumn, ScanOptions, TimeType, WriterOptions,
};

pub const SECRET: &str = "secret";

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counters shared by every session of a backend.
#[derive(Default)]
pub struct Stats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub in_use: AtomicUsize,
    pub max_in_use: AtomicUsize,
    pub writer_closes: AtomicUsize,
    pub scanner_closes: AtomicUsize,
    pub fetches: AtomicUsize,
    pub last_fetch_size: AtomicUsize,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct Cell {
    visibility: Bytes,
    timestamp: i64,
    value: Bytes,
}

type CellKey = (Bytes, Bytes, Bytes);

#[derive(Default)]
struct StoreState {
    tables: BTreeMap<String, BTreeMap<CellKey, Cell>>,
    users: HashMap<String, AuthorizationSet>,
    writers: HashMap<ResourceId, String>,
    scanners: HashMap<ResourceId, VecDeque<KeyValue>>,
    next_id: u64,
    clock: i64,
}

/// In-memory proxy shared by the sessions it creates.
#[derive(Default)]
pub struct MemoryBackend {
    pub stats: Stats,
    state: Mutex<StoreState>,
    /// Rows whose mutations the server rejects.
    reject_rows: Mutex<BTreeSet<Bytes>>,
    /// Upcoming session creations that fail.
    failing_creates: AtomicUsize,
    /// The next fetch fails with a server error.
    fail_next_fetch: AtomicBool,
    /// The next call fails with a transport error.
    fail_next_io: AtomicBool,
    /// Time every call spends "on the wire".
    call_delay: Mutex<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBackend::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let backend = MemoryBackend::default();
        *backend.call_delay.lock() = delay;
        Arc::new(backend)
    }

    pub fn reject_row(&self, row: &str) {
        self.reject_rows.lock().insert(Bytes::copy_from_slice(row.as_bytes()));
    }

    pub fn fail_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_io(&self) {
        self.fail_next_io.store(true, Ordering::SeqCst);
    }

    /// Opens a session, honouring injected creation failures.
    pub fn open(self: &Arc<Self>) -> ClientResult<MemoryProxy> {
        let should_fail = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ClientError::Handshake("injected failure".to_string()));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryProxy {
            backend: Arc::clone(self),
            open: true,
        })
    }

    /// A factory closure suitable for `ConnectionPool::new`.
    pub fn factory(self: &Arc<Self>) -> impl Fn() -> ClientResult<MemoryProxy> + Send + Sync + 'static {
        let backend = Arc::clone(self);
        move || backend.open()
    }

    /// Number of live server-side writers and scanners.
    pub fn open_resources(&self) -> usize {
        let state = self.state.lock();
        state.writers.len() + state.scanners.len()
    }

    pub fn cell_count(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, |cells| cells.len())
    }
}

struct InUse<'a>(&'a Stats);

impl<'a> InUse<'a> {
    fn enter(stats: &'a Stats) -> Self {
        let now = stats.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_use.fetch_max(now, Ordering::SeqCst);
        InUse(stats)
    }
}

impl Drop for InUse<'_> {
    fn drop(&mut self) {
        self.0.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One session against a `MemoryBackend`.
pub struct MemoryProxy {
    backend: Arc<MemoryBackend>,
    open: bool,
}

impl MemoryProxy {
    fn call<T>(&mut self, work: impl FnOnce(&MemoryBackend, &mut StoreState) -> ClientResult<T>) -> ClientResult<T> {
        if !self.open {
            return Err(std::io::Error::new(std::io::ErrorKind::NotConnected, "session closed").into());
        }
        let backend = Arc::clone(&self.backend);
        let _in_use = InUse::enter(&backend.stats);
        let delay = *backend.call_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if backend.fail_next_io.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "injected reset").into());
        }
        let mut state = backend.state.lock();
        work(&backend, &mut state)
    }
}

fn check_token(token: &[u8]) -> ClientResult<()> {
    if token != SECRET.as_bytes() {
        return Err(ClientError::Authentication("AUTH bad token".to_string()));
    }
    Ok(())
}

fn table_mut<'a>(state: &'a mut StoreState, table: &str) -> ClientResult<&'a mut BTreeMap<CellKey, Cell>> {
    state.tables.get_mut(table).ok_or_else(|| ClientError::Server {
        message: format!("table {table} does not exist").into_bytes(),
    })
}

fn row_in_range(range: &Range, row: &[u8]) -> bool {
    if let Some(start) = &range.start {
        let start_row = &start.row[..];
        if row < start_row || (row == start_row && !range.start_inclusive) {
            return false;
        }
    }
    if let Some(end) = &range.end {
        let end_row = &end.row[..];
        if row > end_row || (row == end_row && !range.end_inclusive) {
            return false;
        }
    }
    true
}

fn column_selected(columns: Option<&Vec<ScanColumn>>, cf: &[u8], cq: &[u8]) -> bool {
    match columns {
        None => true,
        Some(columns) => columns.iter().any(|column| {
            &column.family[..] == cf && column.qualifier.as_ref().map_or(true, |q| &q[..] == cq)
        }),
    }
}

fn select(
    cells: &BTreeMap<CellKey, Cell>,
    ranges: &[Range],
    columns: Option<&Vec<ScanColumn>>,
) -> VecDeque<KeyValue> {
    cells
        .iter()
        .filter(|((row, cf, cq), _)| {
            ranges.iter().any(|range| row_in_range(range, row)) && column_selected(columns, cf, cq)
        })
        .map(|((row, cf, cq), cell)| {
            KeyValue::new(
                row.clone(),
                cf.clone(),
                cq.clone(),
                cell.visibility.clone(),
                cell.timestamp,
                cell.value.clone(),
            )
        })
        .collect()
}

fn next_id(state: &mut StoreState, kind: &str) -> ResourceId {
    state.next_id += 1;
    format!("{kind}-{}", state.next_id)
}

impl ProxyClient for MemoryProxy {
    fn table_exists(&mut self, token: &[u8], table: &str) -> ClientResult<bool> {
        self.call(|_, state| {
            check_token(token)?;
            Ok(state.tables.contains_key(table))
        })
    }

    fn create_table(
        &mut self,
        token: &[u8],
        table: &str,
        _version_iter: bool,
        _time_type: TimeType,
    ) -> ClientResult<()> {
        self.call(|_, state| {
            check_token(token)?;
            if state.tables.contains_key(table) {
                return Err(ClientError::Server {
                    message: format!("table {table} exists").into_bytes(),
                });
            }
            state.tables.insert(table.to_string(), BTreeMap::new());
            Ok(())
        })
    }

    fn get_user_authorizations(&mut self, token: &[u8], user: &str) -> ClientResult<AuthorizationSet> {
        self.call(|_, state| {
            check_token(token)?;
            Ok(state.users.get(user).cloned().unwrap_or_default())
        })
    }

    fn change_user_authorizations(
        &mut self,
        token: &[u8],
        user: &str,
        auths: &AuthorizationSet,
    ) -> ClientResult<()> {
        self.call(|_, state| {
            check_token(token)?;
            state.users.insert(user.to_string(), auths.clone());
            Ok(())
        })
    }

    fn create_writer(&mut self, token: &[u8], table: &str, _opts: &WriterOptions) -> ClientResult<ResourceId> {
        self.call(|_, state| {
            check_token(token)?;
            table_mut(state, table)?;
            let id = next_id(state, "writer");
            state.writers.insert(id.clone(), table.to_string());
            Ok(id)
        })
    }

    fn update(&mut self, writer: &str, batch: &MutationBatch) -> ClientResult<Vec<usize>> {
        self.call(|backend, state| {
            let table = state
                .writers
                .get(writer)
                .cloned()
                .ok_or_else(|| ClientError::Server {
                    message: b"unknown writer".to_vec(),
                })?;
            let reject_rows = backend.reject_rows.lock().clone();
            let mut rejected = Vec::new();
            let mut position = 0;
            for row in batch.rows() {
                for update in &row.updates {
                    if reject_rows.contains(&row.row) {
                        rejected.push(position);
                        position += 1;
                        continue;
                    }
                    state.clock += 1;
                    let timestamp = update.timestamp.unwrap_or(state.clock);
                    let key = (
                        row.row.clone(),
                        update.column_family.clone(),
                        update.column_qualifier.clone(),
                    );
                    let cells = table_mut(state, &table)?;
                    if update.delete {
                        cells.remove(&key);
                    } else {
                        cells.insert(
                            key,
                            Cell {
                                visibility: update.visibility.clone(),
                                timestamp,
                                value: update.value.clone(),
                            },
                        );
                    }
                    position += 1;
                }
            }
            Ok(rejected)
        })
    }

    fn flush(&mut self, writer: &str) -> ClientResult<()> {
        self.call(|_, state| {
            if !state.writers.contains_key(writer) {
                return Err(ClientError::Server {
                    message: b"unknown writer".to_vec(),
                });
            }
            Ok(())
        })
    }

    fn close_writer(&mut self, writer: &str) -> ClientResult<()> {
        self.call(|backend, state| {
            backend.stats.writer_closes.fetch_add(1, Ordering::SeqCst);
            state.writers.remove(writer);
            Ok(())
        })
    }

    fn create_scanner(&mut self, token: &[u8], table: &str, opts: &ScanOptions) -> ClientResult<ResourceId> {
        self.call(|_, state| {
            check_token(token)?;
            let ranges = vec![opts.range.clone().unwrap_or_else(Range::all)];
            let records = select(table_mut(state, table)?, &ranges, opts.columns.as_ref());
            let id = next_id(state, "scanner");
            state.scanners.insert(id.clone(), records);
            Ok(id)
        })
    }

    fn create_batch_scanner(
        &mut self,
        token: &[u8],
        table: &str,
        opts: &BatchScanOptions,
    ) -> ClientResult<ResourceId> {
        self.call(|_, state| {
            check_token(token)?;
            let ranges = opts.ranges.clone().unwrap_or_else(|| vec![Range::all()]);
            let mut records = select(table_mut(state, table)?, &ranges, opts.columns.as_ref());
            // Batch scanners make no ordering promise.
            records.make_contiguous().reverse();
            let id = next_id(state, "scanner");
            state.scanners.insert(id.clone(), records);
            Ok(id)
        })
    }

    fn next_k(&mut self, scanner: &str, k: usize) -> ClientResult<ScanBatch> {
        self.call(|backend, state| {
            backend.stats.fetches.fetch_add(1, Ordering::SeqCst);
            backend.stats.last_fetch_size.store(k, Ordering::SeqCst);
            if backend.fail_next_fetch.swap(false, Ordering::SeqCst) {
                return Err(ClientError::Server {
                    message: b"scan interrupted".to_vec(),
                });
            }
            let pending = state.scanners.get_mut(scanner).ok_or_else(|| ClientError::Server {
                message: b"unknown scanner".to_vec(),
            })?;
            let take = k.min(pending.len());
            let results: Vec<KeyValue> = pending.drain(..take).collect();
            Ok(ScanBatch {
                results,
                more: !pending.is_empty(),
            })
        })
    }

    fn close_scanner(&mut self, scanner: &str) -> ClientResult<()> {
        self.call(|backend, state| {
            backend.stats.scanner_closes.fetch_add(1, Ordering::SeqCst);
            state.scanners.remove(scanner);
            Ok(())
        })
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.backend.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryProxy {
    fn drop(&mut self) {
        self.close();
    }
}
