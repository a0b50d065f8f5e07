//! TCP server implementation.

use crate::client::{ClientState, Outbound};
use crate::config::NetworkConfig;
use crate::error::ServerError;
use crate::handler::CommandHandler;
use crate::metrics::Metrics;
use crate::state::ServerState;
use bytes::BytesMut;
use radioserver_protocol::{CommandParser, FrameHeader, MessageHeader, SERVER_VERSION};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Default socket read buffer size (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Read timeout; expiry is not an error, the read is retried.
    pub read_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Messages buffered per client for the writer task.
    pub outbound_queue_capacity: usize,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_network(&NetworkConfig::default())
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            read_timeout: network.read_timeout(),
            max_connections: network.max_connections,
            outbound_queue_capacity: network.outbound_queue_capacity,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for radioserver.
pub struct Server {
    config: ServerConfig,
    handler: Arc<CommandHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server around the shared state.
    pub fn new(config: ServerConfig, state: Arc<ServerState>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(CommandHandler::new(state)),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Server listening on {} (protocol {})",
            listener.local_addr()?,
            SERVER_VERSION
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let metrics = self.handler.state().metrics().cloned();
                            if let Some(ref metrics) = metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    handler,
                                    config,
                                    &mut conn_shutdown,
                                )
                                .await;

                                match result {
                                    Ok(()) | Err(ServerError::ShuttingDown) => {}
                                    Err(e) if e.is_connection_error() => {
                                        tracing::debug!("Connection {} error: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                    Err(e) => {
                                        tracing::warn!("Connection {} failed: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                    }
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Runs one connection: registers the client, reads commands until the
    /// peer leaves, then stops its channel and deregisters it.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<CommandHandler>,
        config: ServerConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!("Client connected: {}", addr);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
        }

        let state = handler.state().clone();
        let (mut reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let client = ClientState::new(
            addr,
            outbound_tx,
            state.channel_config().clone(),
            state.tuning().center_frequency,
            state.metrics().cloned(),
        );
        state.register(client.clone());

        let closed = CancellationToken::new();
        let writer_task = tokio::spawn(Self::write_loop(
            writer,
            outbound_rx,
            client.clone(),
            closed.clone(),
            state.metrics().cloned(),
        ));

        let result =
            Self::read_loop(&mut reader, &client, &handler, &config, &closed, shutdown).await;

        closed.cancel();
        client.shutdown().await;
        state.deregister(&client.id());
        if let Err(e) = writer_task.await {
            tracing::debug!("[{}] Writer task failed: {}", addr, e);
        }

        result
    }

    async fn read_loop(
        reader: &mut OwnedReadHalf,
        client: &Arc<ClientState>,
        handler: &CommandHandler,
        config: &ServerConfig,
        closed: &CancellationToken,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = client.addr();
        let mut parser = CommandParser::new();
        let mut buf = vec![0u8; config.read_buffer_size.max(1)];

        loop {
            let n = tokio::select! {
                _ = closed.cancelled() => {
                    tracing::debug!("[{}] Writer closed", addr);
                    return Ok(());
                }
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
                result = tokio::time::timeout(config.read_timeout, reader.read(&mut buf)) => {
                    match result {
                        Err(_) => continue,
                        Ok(Ok(0)) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            return Ok(());
                        }
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }
            };

            tracing::trace!("[{}] Received {} bytes", addr, n);
            client
                .stats()
                .bytes_received
                .fetch_add(n as u64, Ordering::Relaxed);

            let mut input = &buf[..n];
            while let Some(frame) = parser.advance(&mut input)? {
                client
                    .stats()
                    .commands_received
                    .fetch_add(1, Ordering::Relaxed);
                match frame.command() {
                    Ok(command) => handler.handle(client, command).await?,
                    Err(e) => tracing::debug!("[{}] Ignoring command: {}", addr, e),
                }
            }
        }
    }

    /// Owns the socket's write half; stamps headers and sequence numbers in
    /// queue order.
    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Outbound>,
        client: Arc<ClientState>,
        closed: CancellationToken,
        metrics: Option<Arc<Metrics>>,
    ) {
        let protocol_id = SERVER_VERSION.protocol_id();
        let mut sequence: u32 = 0;
        let mut frame = BytesMut::new();

        loop {
            let message = tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let header = MessageHeader {
                protocol_id,
                message_type: message.message_type.as_u32(),
                stream_type: message.stream_type,
                sequence_number: sequence,
                body_size: message.body.len() as u32,
            };
            sequence = sequence.wrapping_add(1);

            frame.clear();
            header.encode(&mut frame);
            frame.extend_from_slice(&message.body);

            if let Err(e) = writer.write_all(&frame).await {
                tracing::debug!("[{}] Write error: {}", client.addr(), e);
                break;
            }

            let stats = client.stats();
            stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            stats
                .bytes_sent
                .fetch_add(frame.len() as u64, Ordering::Relaxed);
            if let Some(ref metrics) = metrics {
                metrics.bytes_sent_total.inc_by(frame.len() as f64);
            }
        }

        closed.cancel();
        let _ = writer.shutdown().await;
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Receiver notified on shutdown, for tasks running beside the server.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn state(&self) -> &Arc<ServerState> {
        self.handler.state()
    }
}
