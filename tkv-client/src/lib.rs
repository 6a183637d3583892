//! # TabletKV Proxy Client
//!
//! Purpose: Talk to a row/column/timestamp-versioned store through its
//! synchronous RPC proxy, from blocking code or from async code via a bounded
//! connection pool.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A fixed budget of proxy sessions is shared by
//!    all async callers; see `pool`.
//! 2. **One Surface, Two Modes**: `AsyncConnector` mirrors `Connector`, with
//!    each operation dispatched as one blocking call on a pooled session.
//! 3. **Dual Values**: Inputs accept text or bytes; records decode lazily.
//! 4. **Protocol Clarity**: Requests and replies are framed as RESP2.

mod async_connector;
mod connection;
mod connector;
mod error;
mod handle;
mod pool;
mod proxy;
pub mod resp;
mod wire;

pub use async_connector::{AsyncConnector, AsyncScanner, AsyncWriter};
pub use connection::{Connection, ConnectionFactory, ConnectionParams, TcpConnectionFactory, PROTOCOL_VERSION};
pub use connector::{Connector, Scanner, Writer};
pub use error::{ClientError, ClientResult};
pub use handle::DEFAULT_BATCH_SIZE;
pub use pool::{ConnectionPool, Lease, PoolConfig, PoolStatus, DEFAULT_POOL_CAPACITY};
pub use proxy::{ProxyClient, ResourceId, ScanBatch};

pub use tkv_common::codec::*;
pub use tkv_common::error::{CodecError, CodecResult};
pub use tkv_common::range::*;
pub use tkv_common::types::*;
pub use tkv_common::whole_row::*;
