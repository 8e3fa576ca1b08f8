//! Connection Handler
//!
//! Each accepted client runs in its own task. The socket is split: the read
//! half stays with the connection task, the write half goes into a shared
//! [`ReplyWriter`] that the client's pub/sub delivery task also writes to.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, session registered with the broker
//!        │
//!        ▼
//! 2. ┌──────────────────────────────────────┐
//!    │  Main Loop                           │
//!    │                                      │
//!    │  read bytes ──> whole frame? ──no──┐ │
//!    │                     │ yes          │ │
//!    │                     ▼              │ │
//!    │  parse ──> store or broker         │ │
//!    │                     │              │ │
//!    │                     ▼              │ │
//!    │  reply ────────────────────────────┘ │
//!    └──────────────────────────────────────┘
//!        │ EOF, I/O error or protocol error
//!        ▼
//! 3. Session removed from the broker, socket shut down
//! ```
//!
//! A request that breaks the grammar (unknown command, bad option) gets an
//! error reply and the connection carries on. A request that breaks the
//! framing gets an error reply and the connection is closed, since the
//! byte stream can no longer be resynchronized.

use crate::commands::{parse_command, Command, CommandError, CommandHandler, PubSubCommand};
use crate::connection::ReplyWriter;
use crate::protocol::{frame_len, scanner::MAX_BULK_SIZE, RespValue, ScanError};
use crate::pubsub::Broker;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Largest request accepted: one maximal bulk string plus framing slack.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Initial buffer size for reading
const INITIAL_BUFFER_SIZE: usize = 4096;

/// How long teardown waits for queued pushes and the socket shutdown.
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

/// Connection statistics shared by all connections.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total requests processed, including rejected ones
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written as direct replies
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
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    reader: OwnedReadHalf,
    writer: ReplyWriter,
    addr: SocketAddr,
    /// Session id with the broker
    id: String,
    buffer: BytesMut,
    commands: CommandHandler,
    broker: Arc<Broker>,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        broker: Arc<Broker>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        let (reader, writer) = stream.into_split();

        Self {
            reader,
            writer: ReplyWriter::new(writer),
            addr,
            id: addr.to_string(),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            broker,
            stats,
        }
    }

    /// Runs the connection until the client leaves or an error occurs,
    /// then releases the client's pub/sub session.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");
        self.broker.connect(self.id.clone(), self.writer.clone());

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        if !self.broker.close(&self.id, TEARDOWN_GRACE).await {
            debug!(client = %self.addr, "Pending pushes discarded");
        }
        match tokio::time::timeout(TEARDOWN_GRACE, self.writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(client = %self.addr, error = %e, "Shutdown after close"),
            Err(_) => debug!(client = %self.addr, "Shutdown timed out"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Answer every whole request already buffered before reading
            // again; this is what makes pipelining work.
            loop {
                match self.next_frame() {
                    Ok(Some(frame)) => self.process(&frame).await?,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(client = %self.addr, error = %e, "Malformed request");
                        let err = CommandError::Protocol(e.clone());
                        self.send_response(&error_reply(&err)).await?;
                        return Err(ConnectionError::Protocol(e));
                    }
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Splits the next whole request off the buffer.
    fn next_frame(&mut self) -> Result<Option<Bytes>, ScanError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match frame_len(&self.buffer)? {
            Some(len) => {
                let frame = self.buffer.split_to(len).freeze();
                trace!(
                    client = %self.addr,
                    consumed = len,
                    remaining = self.buffer.len(),
                    "Framed request"
                );
                Ok(Some(frame))
            }
            None => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete request, need more data"
                );
                Ok(None)
            }
        }
    }

    async fn process(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        self.stats.command_processed();

        match parse_command(frame) {
            Ok(Command::Store(command)) => {
                let response = self.commands.execute(command);
                self.send_response(&response).await
            }
            Ok(Command::PubSub(command)) => self.pubsub(command).await,
            Err(CommandError::Protocol(e)) => {
                let err = CommandError::Protocol(e.clone());
                self.send_response(&error_reply(&err)).await?;
                Err(ConnectionError::Protocol(e))
            }
            Err(e) => {
                debug!(client = %self.addr, error = %e, "Rejected request");
                self.send_response(&error_reply(&e)).await
            }
        }
    }

    async fn pubsub(&mut self, command: PubSubCommand) -> Result<(), ConnectionError> {
        match command {
            // Confirmations go through the delivery queue; `subscribe`
            // returns once they are written.
            PubSubCommand::Subscribe { topics } => {
                if let Err(e) = self.broker.subscribe(&self.id, &topics, &self.writer).await {
                    error!(client = %self.addr, error = %e, "Subscribe failed");
                    self.send_response(&RespValue::error(format!("ERR {}", e)))
                        .await?;
                }
                Ok(())
            }
            PubSubCommand::Unsubscribe { topics } => {
                let removed = self.broker.unsubscribe(&self.id, &topics);
                self.send_response(&RespValue::from(removed)).await
            }
            PubSubCommand::Publish { topic, message } => {
                let reached = self.broker.publish(&topic, message).await;
                self.send_response(&RespValue::from(reached)).await
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.reader.read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let written = self.writer.send(response).await?;
        self.stats.bytes_written(written);
        trace!(client = %self.addr, bytes = written, "Sent response");
        Ok(())
    }
}

fn error_reply(err: &CommandError) -> RespValue {
    RespValue::error(format!("ERR {}", err))
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ScanError),

    #[error("Client disconnected")]
    ClientDisconnected,

    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Convenience function to handle a connection.
///
/// Spawn this for each accepted connection.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandHandler,
    broker: Arc<Broker>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, commands, broker, stats);
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
