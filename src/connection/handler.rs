//! Connection Handler Module
//!
//! This module handles individual client connections to DuraKV.
//! Each client gets its own handler task that runs in a loop,
//! reading commands and sending responses.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Authenticate (only if `requirepass` is set)
//!    every frame is a login attempt until AUTH succeeds
//!        │
//!        ▼
//! 3. Restore-if-needed (snapshot + log replay, once per process)
//!        │
//!        ▼
//! 4. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │  read -> parse -> execute    │
//!    │       -> send -> loop back   │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 5. Client disconnects, or a malformed frame gets one
//!    `-ERR invalid request` reply and the connection is closed
//! ```
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. This is important
//! because TCP is a stream protocol - we might receive partial commands,
//! or multiple commands in a single read.

use crate::commands::CommandHandler;
use crate::persistence::PersistenceError;
use crate::protocol::{EncodeError, ParseError, RespParser, RespValue};
use crate::server::ServerContext;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// This struct manages the read buffer, parsing, authentication and response
/// sending for one connected client. It works over any byte stream.
pub struct ConnectionHandler<S> {
    /// The stream for this connection
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Shared server state, used for the one-time restore
    ctx: Arc<ServerContext>,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// RESP parser
    parser: RespParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Whether AUTH has succeeded (always true without `requirepass`)
    authenticated: bool,

    /// Most unparsed bytes this connection may hold (`client-query-buffer-limit`)
    buffer_limit: usize,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The stream for this connection
    /// * `addr` - The client's socket address
    /// * `ctx` - The shared server context
    pub fn new(stream: S, addr: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        let stats = Arc::clone(ctx.stats());
        stats.connection_opened();

        let command_handler = ctx.command_handler();
        let authenticated = !command_handler.requires_auth();
        let buffer_limit = ctx.config().client_query_buffer_limit;

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            ctx,
            command_handler,
            parser: RespParser::new(),
            stats,
            authenticated,
            buffer_limit,
        }
    }

    /// Runs the connection until the client disconnects or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// Authenticate, restore, then the read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        if self.authenticated {
            self.ctx.ensure_restored().await?;
        }

        loop {
            // Handle every complete command already buffered
            loop {
                let command = match self.try_parse_command() {
                    Ok(Some(command)) => command,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = self
                            .send_response(&RespValue::error("ERR invalid request"))
                            .await;
                        return Err(e);
                    }
                };

                if self.authenticated {
                    let response = self.command_handler.execute(command);
                    self.stats.command_processed();
                    self.send_response(&response).await?;
                } else {
                    let response = self.authenticate(command);
                    self.send_response(&response).await?;
                    if self.authenticated {
                        self.ctx.ensure_restored().await?;
                    }
                }
            }

            // Need more data - read from the stream
            self.read_more_data().await?;
        }
    }

    /// Treats `command` as a login attempt.
    fn authenticate(&mut self, command: RespValue) -> RespValue {
        if !is_auth_command(&command) {
            return RespValue::error("NOAUTH Authentication required.");
        }

        let response = self.command_handler.execute(command);
        if !response.is_error() {
            self.authenticated = true;
            info!(client = %self.addr, "Client authenticated");
        }
        response
    }

    /// Attempts to parse a command from the buffer.
    fn try_parse_command(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((value, consumed))) => {
                // Successfully parsed a command - consume the bytes
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(value))
            }
            Ok(None) => {
                // Incomplete data - need to read more
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete command, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error");
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    /// Reads more data from the stream into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        // Check buffer size limit
        if self.buffer.len() >= self.buffer_limit {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                limit = self.buffer_limit,
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial command in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Whether a frame is an `AUTH ...` request.
fn is_auth_command(command: &RespValue) -> bool {
    command
        .as_array()
        .and_then(|args| args.first())
        .and_then(RespValue::as_str)
        .map(|name| name.eq_ignore_ascii_case("AUTH"))
        .unwrap_or(false)
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// RESP parse error
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// A reply could not be serialized
    #[error("Encode error: {0}")]
    EncodeError(#[from] EncodeError),

    /// Loading the snapshot or replaying the log failed
    #[error("Restore failed: {0}")]
    RestoreFailed(#[from] PersistenceError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler
/// and runs it to completion.
///
/// # Arguments
///
/// * `stream` - The stream for this connection
/// * `addr` - The client's socket address
/// * `ctx` - The shared server context
pub async fn handle_connection<S>(stream: S, addr: SocketAddr, ctx: Arc<ServerContext>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, ctx);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use bytes::Bytes;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_context(dir: &Path, password: Option<&str>) -> Arc<ServerContext> {
        let config = Config {
            dir: dir.to_path_buf(),
            requirepass: password.map(str::to_string),
            ..Config::default()
        };
        Arc::new(ServerContext::new(config).unwrap())
    }

    #[tokio::test]
    async fn test_oversized_request_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            dir: dir.path().to_path_buf(),
            client_query_buffer_limit: 16,
            ..Config::default()
        };
        let ctx = Arc::new(ServerContext::new(config).unwrap());

        // Declares a 100 byte value but the limit is hit first
        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$100\r\n")
            .build();

        let result = ConnectionHandler::new(stream, client_addr(), Arc::clone(&ctx))
            .run()
            .await;
        assert!(matches!(result, Err(ConnectionError::BufferFull)));
        assert!(ctx.storage().is_empty());
    }

    fn client_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    async fn create_test_server(ctx: Arc<ServerContext>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, client_addr, Arc::clone(&ctx)));
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_session_over_mock_stream() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), None);

        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .write(b"+OK\r\n")
            .read(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .write(b"$1\r\nv\r\n")
            .build();

        let result = ConnectionHandler::new(stream, client_addr(), ctx).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_auth_required_before_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), Some("secret"));

        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"-NOAUTH Authentication required.\r\n")
            .read(b"*2\r\n$4\r\nAUTH\r\n$5\r\nwrong\r\n")
            .write(b"-WRONGPASS invalid password\r\n")
            .read(b"*2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n")
            .write(b"+OK\r\n")
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();

        let result = ConnectionHandler::new(stream, client_addr(), Arc::clone(&ctx))
            .run()
            .await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_unauthenticated_commands_do_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), Some("secret"));

        let stream = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .write(b"-NOAUTH Authentication required.\r\n")
            .build();

        let _ = ConnectionHandler::new(stream, client_addr(), Arc::clone(&ctx))
            .run()
            .await;
        assert!(ctx.storage().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), None);

        let stream = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .read(b"?garbage\r\n")
            .write(b"-ERR invalid request\r\n")
            .build();

        let result = ConnectionHandler::new(stream, client_addr(), ctx).run().await;
        assert!(matches!(result, Err(ConnectionError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let dir = tempfile::tempdir().unwrap();
        let addr = create_test_server(test_context(dir.path(), None)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Send PING command
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        // Read response
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get() {
        let dir = tempfile::tempdir().unwrap();
        let addr = create_test_server(test_context(dir.path(), None)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Send SET command
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        // Send GET command
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();

        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$4\r\nAriz\r\n");
    }

    #[tokio::test]
    async fn test_multiple_commands() {
        let dir = tempfile::tempdir().unwrap();
        let addr = create_test_server(test_context(dir.path(), None)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Send multiple commands in one write (pipelining)
        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n")
            .await
            .unwrap();

        // Expected: +OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n (26 bytes)
        let mut buf = vec![0u8; 26];
        tokio::time::timeout(
            tokio::time::Duration::from_secs(2),
            client.read_exact(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(&buf[..], b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n");
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let addr = create_test_server(test_context(dir.path(), None)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*2\r\n$4\r\nPI").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        client.write_all(b"NG\r\n$2\r\nhi\r\n").await.unwrap();

        let mut buf = vec![0u8; 8];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], b"$2\r\nhi\r\n");
    }

    #[tokio::test]
    async fn test_concurrent_clients_disjoint_sets() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), None);
        let addr = create_test_server(Arc::clone(&ctx)).await;

        let mut tasks = Vec::new();
        for i in 0..20 {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                let key = format!("key{:02}", i);
                let request = format!("*3\r\n$3\r\nSET\r\n$5\r\n{}\r\n$1\r\nv\r\n", key);
                client.write_all(request.as_bytes()).await.unwrap();

                let mut buf = vec![0u8; 5];
                client.read_exact(&mut buf).await.unwrap();
                assert_eq!(&buf[..], b"+OK\r\n");
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(ctx.storage().len(), 20);
        for i in 0..20 {
            assert!(ctx.storage().exists(&Bytes::from(format!("key{:02}", i))));
        }
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), None);
        let stats = Arc::clone(ctx.stats());
        let addr = create_test_server(ctx).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        // Send a command
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        // Close connection
        drop(client);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
