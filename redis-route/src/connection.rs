//! Connection management
//!
//! This module handles a single TCP (optionally TLS) connection to a Redis
//! server: socket setup, the AUTH/SELECT handshake, request framing and
//! reply reading.
//!
//! A connection moves `Disconnected → Connecting → Ready` and falls back to
//! `Disconnected` on any I/O or framing fault. Once disconnected it never
//! carries another request; the pool discards it.

use crate::protocol::{Cmd, RespDecoder};
use bytes::{Buf, BytesMut};
use redis_route_core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
    types::Endpoint,
    value::RespValue,
};
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// Socket being opened
    Connecting,
    /// Socket open and in sync with the server
    Ready,
}

enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(tcp) => {
                tcp.write_all(buf).await?;
                tcp.flush().await
            }
            #[cfg(feature = "tls")]
            Self::Tls(tls) => {
                tls.write_all(buf).await?;
                tls.flush().await
            }
        }
    }

    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Self::Tcp(tcp) => tcp.read_buf(buf).await,
            #[cfg(feature = "tls")]
            Self::Tls(tls) => tls.read_buf(buf).await,
        }
    }

    /// Read whatever is already available without waiting.
    ///
    /// `Ok(None)` means the peer closed the socket.
    fn drain_available(&mut self) -> io::Result<Option<usize>> {
        match self {
            Self::Tcp(tcp) => {
                let mut scratch = [0u8; 4096];
                let mut drained = 0;
                loop {
                    match tcp.try_read(&mut scratch) {
                        Ok(0) => return Ok(None),
                        Ok(n) => drained += n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Some(drained)),
                        Err(e) => return Err(e),
                    }
                }
            }
            // raw socket reads would corrupt the TLS session; only the buffer is checked
            #[cfg(feature = "tls")]
            Self::Tls(_) => Ok(Some(0)),
        }
    }
}

/// A connection to a Redis server
pub struct RedisConnection {
    id: u64,
    endpoint: Endpoint,
    config: Arc<ConnectionConfig>,
    select_database: bool,
    stream: Option<Stream>,
    state: ConnectionState,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    authenticated: bool,
    selected_db: Option<u8>,
    last_used: Instant,
}

impl RedisConnection {
    /// Connect to a Redis server.
    ///
    /// The AUTH/SELECT handshake is deferred to the first command. `select_database`
    /// is false for cluster and sentinel deployments, which pin database 0.
    pub async fn connect(
        endpoint: Endpoint,
        config: Arc<ConnectionConfig>,
        select_database: bool,
    ) -> RedisResult<Self> {
        let mut conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            config,
            select_database,
            stream: None,
            state: ConnectionState::Disconnected,
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(1024),
            authenticated: false,
            selected_db: None,
            last_used: Instant::now(),
        };
        conn.open().await?;
        Ok(conn)
    }

    async fn open(&mut self) -> RedisResult<()> {
        let addr = self.endpoint.address();
        debug!("Connecting to Redis at {}", addr);
        self.state = ConnectionState::Connecting;

        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(RedisError::Connection(format!(
                    "Failed to connect to {}: {}",
                    addr, e
                )));
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(RedisError::Timeout);
            }
        };

        if let Err(e) = self.configure_socket(&stream) {
            self.state = ConnectionState::Disconnected;
            return Err(e);
        }

        let stream = match self.wrap_tls(stream).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        self.stream = Some(stream);
        self.state = ConnectionState::Ready;
        self.authenticated = false;
        self.selected_db = None;
        self.read_buffer.clear();
        debug!("Connection #{} to {} ready", self.id, addr);
        Ok(())
    }

    fn configure_socket(&self, stream: &TcpStream) -> RedisResult<()> {
        stream.set_nodelay(true)?;

        // Set TCP keepalive if configured
        if let Some(keepalive_duration) = self.config.tcp_keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(keepalive_duration);
            socket2::SockRef::from(stream)
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| {
                    RedisError::Connection(format!("Failed to set TCP keepalive: {}", e))
                })?;
        }
        Ok(())
    }

    #[cfg(feature = "tls")]
    async fn wrap_tls(&self, stream: TcpStream) -> RedisResult<Stream> {
        if !self.config.tls.enabled {
            return Ok(Stream::Tcp(stream));
        }
        let tls = crate::tls::connect(stream, &self.endpoint.host, &self.config.tls).await?;
        Ok(Stream::Tls(Box::new(tls)))
    }

    #[cfg(not(feature = "tls"))]
    async fn wrap_tls(&self, stream: TcpStream) -> RedisResult<Stream> {
        if self.config.tls.enabled {
            return Err(RedisError::Config(
                "TLS support requires the `tls` feature".to_string(),
            ));
        }
        Ok(Stream::Tcp(stream))
    }

    /// Reopen the socket if a previous fault closed it
    pub async fn ensure_connected(&mut self) -> RedisResult<()> {
        if self.state != ConnectionState::Ready {
            self.open().await?;
        }
        Ok(())
    }

    /// Authenticate and select the database once per physical connection
    async fn handshake(&mut self) -> RedisResult<()> {
        if !self.authenticated {
            if let Some(password) = self.config.password.clone() {
                debug!("Authenticating connection #{}", self.id);
                let mut auth = Cmd::new("AUTH");
                if let Some(username) = self.config.username.clone() {
                    auth = auth.arg(username);
                }
                match self.round_trip(&auth.arg(password), self.config.operation_timeout).await? {
                    RespValue::SimpleString(ref s) if s == "OK" => {}
                    RespValue::Error(e) => return Err(RedisError::Auth(e)),
                    other => {
                        return Err(RedisError::Auth(format!(
                            "Unexpected authentication response: {:?}",
                            other
                        )))
                    }
                }
            }
            self.authenticated = true;
        }

        let db = self.config.database;
        if self.select_database && db != 0 && self.selected_db != Some(db) {
            let select = Cmd::new("SELECT").arg(i64::from(db));
            match self.round_trip(&select, self.config.operation_timeout).await? {
                RespValue::SimpleString(ref s) if s == "OK" => self.selected_db = Some(db),
                RespValue::Error(e) => return Err(RedisError::Server(e)),
                other => {
                    return Err(RedisError::Protocol(format!(
                        "Unexpected SELECT response: {:?}",
                        other
                    )))
                }
            }
        }
        Ok(())
    }

    /// Execute a command and return the response.
    ///
    /// Error replies come back as `Err`: `Moved`/`Ask` for redirects, `Server` otherwise.
    pub async fn execute_command(
        &mut self,
        command: &str,
        args: &[RespValue],
    ) -> RedisResult<RespValue> {
        let cmd = Cmd::new(command).args(args.iter().cloned());
        self.query(&cmd).await
    }

    /// Execute a prepared command with the configured timeout
    pub async fn query(&mut self, cmd: &Cmd) -> RedisResult<RespValue> {
        self.query_with_timeout(cmd, self.config.operation_timeout).await
    }

    /// Execute a prepared command, waiting at most `read_timeout` for the reply
    pub async fn query_with_timeout(
        &mut self,
        cmd: &Cmd,
        read_timeout: Duration,
    ) -> RedisResult<RespValue> {
        self.ensure_connected().await?;
        self.handshake().await?;
        self.round_trip(cmd, read_timeout).await?.into_result()
    }

    /// Send every command in one write and read back exactly as many replies.
    ///
    /// Error replies stay in the returned vector as `RespValue::Error` so the
    /// caller sees each command's own outcome.
    pub async fn execute_pipeline(&mut self, commands: &[Cmd]) -> RedisResult<Vec<RespValue>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        self.write_buffer.clear();
        for cmd in commands {
            if let Err(e) = cmd.write_to(self.config.max_message_size, &mut self.write_buffer) {
                self.write_buffer.clear();
                return Err(e);
            }
        }

        self.ensure_connected().await?;
        self.handshake().await?;
        self.flush_write_buffer().await?;

        let deadline = Instant::now() + self.config.operation_timeout;
        let mut replies = Vec::with_capacity(commands.len());
        for _ in 0..commands.len() {
            replies.push(self.read_response(deadline).await?);
        }
        Ok(replies)
    }

    /// One request/reply exchange with no handshake and error replies left as values
    async fn round_trip(&mut self, cmd: &Cmd, read_timeout: Duration) -> RedisResult<RespValue> {
        self.write_buffer.clear();
        if let Err(e) = cmd.write_to(self.config.max_message_size, &mut self.write_buffer) {
            self.write_buffer.clear();
            return Err(e);
        }
        self.flush_write_buffer().await?;
        self.read_response(Instant::now() + read_timeout).await
    }

    async fn flush_write_buffer(&mut self) -> RedisResult<()> {
        let write_timeout = self.config.operation_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RedisError::Connection("Connection is closed".to_string()))?;

        let result = match timeout(write_timeout, stream.write_all(&self.write_buffer)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RedisError::Io(e)),
            Err(_) => Err(RedisError::Timeout),
        };
        self.write_buffer.clear();
        self.last_used = Instant::now();
        result.map_err(|e| self.fail(e))
    }

    /// Read one complete RESP value, waiting until `deadline` at most
    async fn read_response(&mut self, deadline: Instant) -> RedisResult<RespValue> {
        let max = self.config.max_message_size;
        loop {
            // Try to decode from existing buffer
            let mut cursor = Cursor::new(&self.read_buffer[..]);
            match RespDecoder::decode_with_limit(&mut cursor, max) {
                Ok(Some(value)) => {
                    let pos = cursor.position() as usize;
                    self.read_buffer.advance(pos);
                    self.last_used = Instant::now();
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => return Err(self.fail(e)),
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(RedisError::Connection("Connection is closed".to_string()));
            };

            // Need more data - read from socket
            let read = tokio::time::timeout_at(deadline, stream.read_buf(&mut self.read_buffer)).await;
            match read {
                Ok(Ok(0)) => {
                    return Err(self.fail(RedisError::Connection(
                        "Connection closed by server".to_string(),
                    )))
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(self.fail(RedisError::Io(e))),
                Err(_) => return Err(self.fail(RedisError::Timeout)),
            }
        }
    }

    /// Drop the socket after a fault that leaves the stream out of sync
    fn fail(&mut self, err: RedisError) -> RedisError {
        if err.is_connection_fatal() {
            warn!(
                "Connection #{} to {} closed after fault: {}",
                self.id, self.endpoint, err
            );
            self.close();
        }
        err
    }

    /// Close the socket
    pub fn close(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
        self.read_buffer.clear();
        self.write_buffer.clear();
    }

    /// Discard bytes left over from an earlier caller before the connection is reused.
    ///
    /// Returns false when the connection is no longer usable.
    pub fn reset(&mut self) -> bool {
        if self.state != ConnectionState::Ready {
            return false;
        }

        let mut stale = self.read_buffer.len();
        self.read_buffer.clear();
        self.write_buffer.clear();

        let Some(stream) = self.stream.as_mut() else {
            self.state = ConnectionState::Disconnected;
            return false;
        };
        match stream.drain_available() {
            Ok(Some(n)) => stale += n,
            Ok(None) | Err(_) => {
                debug!("Connection #{} to {} closed while idle", self.id, self.endpoint);
                self.close();
                return false;
            }
        }

        if stale > 0 {
            warn!(
                "Discarded {} stale bytes on connection #{} to {}",
                stale, self.id, self.endpoint
            );
        }
        true
    }

    /// Unique id of this connection within the process
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Server this connection talks to
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection can carry another request
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// When the connection last sent or received anything
    #[must_use]
    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Configuration the connection was opened with
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish()
    }
}
