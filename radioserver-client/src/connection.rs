//! Connection management.

use crate::error::ClientError;
use radioserver_protocol::{Command, Frame, MessageHeader, MessageParser, MessageType};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default read buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// A server message: header plus body.
pub type Message = Frame<MessageHeader>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time to wait for a single message.
    pub request_timeout: Duration,
    /// Client name for HELLO.
    pub client_name: Option<String>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            client_name: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// A connection to a SpyServer compatible server.
///
/// Messages arrive unsolicited (syncs from other clients' changes, sample
/// data), so the connection is owned by one reader and exposes a plain
/// read/write surface.
pub struct Connection {
    config: ConnectionConfig,
    stream: TcpStream,
    parser: MessageParser,
    pending: VecDeque<Message>,
    buf: Vec<u8>,
}

impl Connection {
    /// Connects to the server.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;
        stream.set_nodelay(true)?;

        tracing::debug!("Connected to {}", config.addr);
        let buf = vec![0u8; config.read_buffer_size.max(MIN_READ_BUFFER_SIZE)];
        Ok(Self {
            config,
            stream,
            parser: MessageParser::new(),
            pending: VecDeque::new(),
            buf,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.stream.local_addr()?)
    }

    /// Encodes and sends a command.
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        tracing::trace!("Sending {}", command.command_type().name());
        let frame = command.encode();
        self.write_raw(&frame).await
    }

    /// Writes raw bytes to the socket.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    /// Reads the next message, waiting at most the configured request timeout.
    pub async fn read_message(&mut self) -> Result<Message, ClientError> {
        let timeout = self.config.request_timeout;
        self.read_message_timeout(timeout).await
    }

    /// Reads the next message, waiting at most `timeout`.
    pub async fn read_message_timeout(&mut self, timeout: Duration) -> Result<Message, ClientError> {
        tokio::time::timeout(timeout, self.next_message())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Reads messages until one of type `wanted` arrives; others are dropped.
    pub async fn read_until(&mut self, wanted: MessageType) -> Result<Message, ClientError> {
        self.read_matching(|message_type| message_type == Some(wanted))
            .await
    }

    /// Reads messages until `accept` returns true for a message type.
    ///
    /// Unknown message types are passed as `None`.
    pub async fn read_matching<F>(&mut self, accept: F) -> Result<Message, ClientError>
    where
        F: Fn(Option<MessageType>) -> bool,
    {
        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, async {
            loop {
                let message = self.next_message().await?;
                let message_type = MessageType::try_from(message.header.message_type).ok();
                if accept(message_type) {
                    return Ok(message);
                }
                tracing::trace!("Skipping message type {}", message.header.message_type);
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    async fn next_message(&mut self) -> Result<Message, ClientError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }

            let n = match self.stream.read(&mut self.buf).await {
                Ok(0) => return Err(ClientError::ConnectionClosed),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    return Err(ClientError::ConnectionClosed)
                }
                Err(e) => return Err(ClientError::Io(e)),
            };

            let mut input = &self.buf[..n];
            while let Some(frame) = self.parser.advance(&mut input)? {
                self.pending.push_back(frame);
            }
        }
    }

    /// Closes the write side of the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
