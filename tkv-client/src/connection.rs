//! # Proxy Connection
//!
//! Purpose: Own one authenticated TCP session to the proxy and expose the
//! proxy calls over it, plus the factory that opens such sessions.
//!
//! ## Design Principles
//! 1. **All-or-Nothing Open**: A `Connection` exists only after the socket is
//!    up and the handshake succeeded.
//! 2. **Buffer Reuse**: Each connection keeps its own framing buffers.
//! 3. **Idempotent Close**: Closing twice is a no-op; calls after close fail.
//! 4. **Factory Seam**: The pool creates sessions through `ConnectionFactory`,
//!    which closures implement too.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use tkv_common::{AuthorizationSet, BatchScanOptions, MutationBatch, ScanOptions, TimeType, WriterOptions};

use crate::error::{ClientError, ClientResult};
use crate::proxy::{ProxyClient, ResourceId, ScanBatch};
use crate::resp::{encode_command, read_response, RespValue};
use crate::wire;

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: i64 = 1;

/// Network parameters for proxy sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Shared secret presented during the handshake.
    pub shared_secret: Option<String>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        ConnectionParams {
            host: "127.0.0.1".to_string(),
            port: 42424,
            shared_secret: None,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// One proxy session.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    open: bool,
}

impl Connection {
    /// Connects and performs the handshake.
    pub fn open(params: &ConnectionParams) -> ClientResult<Self> {
        let stream = connect_stream(params)?;
        if let Some(timeout) = params.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = params.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            open: true,
        };
        if let Err(err) = conn.handshake(params.shared_secret.as_deref()) {
            warn!(host = %params.host, port = params.port, error = %err, "proxy handshake failed");
            conn.close();
            return Err(err);
        }
        debug!(host = %params.host, port = params.port, "proxy connection open");
        Ok(conn)
    }

    /// Returns true until `close` is called.
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn handshake(&mut self, secret: Option<&str>) -> ClientResult<()> {
        let mut args = vec![RespValue::Integer(PROTOCOL_VERSION)];
        if let Some(secret) = secret {
            args.push(RespValue::bulk(secret.as_bytes()));
        }
        match self.call(b"HELLO", &args) {
            Ok(RespValue::Simple(_)) => Ok(()),
            Ok(_) => Err(ClientError::Handshake("unexpected reply to HELLO".to_string())),
            Err(ClientError::Server { message }) => {
                Err(ClientError::Handshake(String::from_utf8_lossy(&message).into_owned()))
            }
            Err(err) => Err(err),
        }
    }

    /// Sends one request and reads its reply. Error replies become errors.
    fn call(&mut self, name: &[u8], args: &[RespValue]) -> ClientResult<RespValue> {
        if !self.open {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection closed",
            )));
        }

        self.write_buf.clear();
        encode_command(name, args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        match read_response(&mut self.reader, &mut self.line_buf)? {
            RespValue::Error(message) => Err(wire::server_error(message)),
            value => Ok(value),
        }
    }
}

impl ProxyClient for Connection {
    fn table_exists(&mut self, token: &[u8], table: &str) -> ClientResult<bool> {
        let reply = self.call(b"tableExists", &[RespValue::bulk(token), RespValue::bulk(table.as_bytes())])?;
        wire::decode_bool(reply)
    }

    fn create_table(
        &mut self,
        token: &[u8],
        table: &str,
        version_iter: bool,
        time_type: TimeType,
    ) -> ClientResult<()> {
        let reply = self.call(
            b"createTable",
            &[
                RespValue::bulk(token),
                RespValue::bulk(table.as_bytes()),
                RespValue::boolean(version_iter),
                RespValue::Integer(time_type.code()),
            ],
        )?;
        wire::expect_ok(reply)
    }

    fn get_user_authorizations(&mut self, token: &[u8], user: &str) -> ClientResult<AuthorizationSet> {
        let reply = self.call(
            b"getUserAuthorizations",
            &[RespValue::bulk(token), RespValue::bulk(user.as_bytes())],
        )?;
        wire::decode_authorizations(reply)
    }

    fn change_user_authorizations(
        &mut self,
        token: &[u8],
        user: &str,
        auths: &AuthorizationSet,
    ) -> ClientResult<()> {
        let reply = self.call(
            b"changeUserAuthorizations",
            &[
                RespValue::bulk(token),
                RespValue::bulk(user.as_bytes()),
                wire::authorizations(auths),
            ],
        )?;
        wire::expect_ok(reply)
    }

    fn create_writer(&mut self, token: &[u8], table: &str, opts: &WriterOptions) -> ClientResult<ResourceId> {
        let reply = self.call(
            b"createWriter",
            &[
                RespValue::bulk(token),
                RespValue::bulk(table.as_bytes()),
                wire::writer_options(opts),
            ],
        )?;
        wire::decode_id(reply)
    }

    fn update(&mut self, writer: &str, batch: &MutationBatch) -> ClientResult<Vec<usize>> {
        let reply = self.call(
            b"update",
            &[RespValue::bulk(writer.as_bytes()), wire::mutation_batch(batch)],
        )?;
        wire::decode_rejected(reply)
    }

    fn flush(&mut self, writer: &str) -> ClientResult<()> {
        let reply = self.call(b"flush", &[RespValue::bulk(writer.as_bytes())])?;
        wire::expect_ok(reply)
    }

    fn close_writer(&mut self, writer: &str) -> ClientResult<()> {
        let reply = self.call(b"closeWriter", &[RespValue::bulk(writer.as_bytes())])?;
        wire::expect_ok(reply)
    }

    fn create_scanner(&mut self, token: &[u8], table: &str, opts: &ScanOptions) -> ClientResult<ResourceId> {
        let reply = self.call(
            b"createScanner",
            &[
                RespValue::bulk(token),
                RespValue::bulk(table.as_bytes()),
                wire::scan_options(opts),
            ],
        )?;
        wire::decode_id(reply)
    }

    fn create_batch_scanner(
        &mut self,
        token: &[u8],
        table: &str,
        opts: &BatchScanOptions,
    ) -> ClientResult<ResourceId> {
        let reply = self.call(
            b"createBatchScanner",
            &[
                RespValue::bulk(token),
                RespValue::bulk(table.as_bytes()),
                wire::batch_scan_options(opts),
            ],
        )?;
        wire::decode_id(reply)
    }

    fn next_k(&mut self, scanner: &str, k: usize) -> ClientResult<ScanBatch> {
        let reply = self.call(
            b"nextK",
            &[RespValue::bulk(scanner.as_bytes()), RespValue::Integer(k as i64)],
        )?;
        wire::decode_scan_batch(reply)
    }

    fn close_scanner(&mut self, scanner: &str) -> ClientResult<()> {
        let reply = self.call(b"closeScanner", &[RespValue::bulk(scanner.as_bytes())])?;
        wire::expect_ok(reply)
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        // The peer may already be gone; shutdown errors carry no information.
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        debug!("proxy connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_stream(params: &ConnectionParams) -> ClientResult<TcpStream> {
    let addr: SocketAddr = (params.host.as_str(), params.port)
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress)?
        .next()
        .ok_or(ClientError::InvalidAddress)?;
    let stream = match params.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}

/// Creates new proxy sessions on demand.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: ProxyClient + 'static;

    /// Opens a fully initialised session or fails without side effects.
    fn create(&self) -> ClientResult<Self::Conn>;
}

impl<C, F> ConnectionFactory for F
where
    C: ProxyClient + 'static,
    F: Fn() -> ClientResult<C> + Send + Sync + 'static,
{
    type Conn = C;

    fn create(&self) -> ClientResult<C> {
        self()
    }
}

/// Factory for TCP sessions from fixed network parameters.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectionFactory {
    params: ConnectionParams,
}

impl TcpConnectionFactory {
    pub fn new(params: ConnectionParams) -> Self {
        TcpConnectionFactory { params }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    type Conn = Connection;

    fn create(&self) -> ClientResult<Connection> {
        Connection::open(&self.params)
    }
}
