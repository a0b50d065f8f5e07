//! Prometheus metrics for radioserver.
//!
//! This module provides:
//! - Metrics registry with connection, command and streaming counters
//! - HTTP server to expose metrics at `/metrics` endpoint

use crate::error::ServerError;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Prometheus metrics for the radioserver.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Commands received by type.
    pub commands_total: CounterVec,
    /// Rejected `SET_SETTING` requests by reason.
    pub settings_rejected_total: CounterVec,
    /// Raw sample blocks dropped on a full channel queue.
    pub blocks_dropped_total: Counter,
    /// Sample frames queued for sending by stream.
    pub frames_sent_total: CounterVec,
    /// Outbound messages dropped on a full client queue.
    pub outbound_dropped_total: Counter,
    /// Bytes written to client sockets.
    pub bytes_sent_total: Counter,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "radioserver_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "radioserver_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Commands
        let commands_total = CounterVec::new(
            Opts::new("radioserver_commands_total", "Total commands by type"),
            &["command"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let settings_rejected_total = CounterVec::new(
            Opts::new(
                "radioserver_settings_rejected_total",
                "Rejected setting changes by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(settings_rejected_total.clone()))?;

        // Streaming
        let blocks_dropped_total = Counter::with_opts(Opts::new(
            "radioserver_blocks_dropped_total",
            "Sample blocks dropped because a client queue was full",
        ))?;
        registry.register(Box::new(blocks_dropped_total.clone()))?;

        let frames_sent_total = CounterVec::new(
            Opts::new(
                "radioserver_frames_sent_total",
                "Sample frames queued for clients by stream",
            ),
            &["stream"],
        )?;
        registry.register(Box::new(frames_sent_total.clone()))?;

        let outbound_dropped_total = Counter::with_opts(Opts::new(
            "radioserver_outbound_dropped_total",
            "Messages dropped because a client send queue was full",
        ))?;
        registry.register(Box::new(outbound_dropped_total.clone()))?;

        let bytes_sent_total = Counter::with_opts(Opts::new(
            "radioserver_bytes_sent_total",
            "Total bytes written to clients",
        ))?;
        registry.register(Box::new(bytes_sent_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            commands_total,
            settings_rejected_total,
            blocks_dropped_total,
            frames_sent_total,
            outbound_dropped_total,
            bytes_sent_total,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => {
            let mut response = text_response(StatusCode::OK, metrics.encode());
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            response
        }
        "/health" | "/healthz" => text_response(StatusCode::OK, "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.connections_active.inc();
        metrics.commands_total.with_label_values(&["HELLO"]).inc();
        metrics
            .settings_rejected_total
            .with_label_values(&["out_of_range"])
            .inc();
        metrics.frames_sent_total.with_label_values(&["iq"]).inc();

        let encoded = String::from_utf8(metrics.encode()).unwrap();

        assert!(encoded.contains("radioserver_connections_total"));
        assert!(encoded.contains("radioserver_connections_active"));
        assert!(encoded.contains("radioserver_commands_total"));
        assert!(encoded.contains("radioserver_settings_rejected_total"));
        assert!(encoded.contains("radioserver_frames_sent_total"));
    }

    #[test]
    fn test_counter_values() {
        let metrics = Metrics::new().unwrap();
        metrics.blocks_dropped_total.inc_by(904.0);
        metrics.bytes_sent_total.inc_by(56.0);
        metrics.connections_active.set(3.0);

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains("radioserver_blocks_dropped_total 904"));
        assert!(encoded.contains("radioserver_bytes_sent_total 56"));
        assert!(encoded.contains("radioserver_connections_active 3"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.connections_total.inc();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(run_metrics_server(addr, metrics, shutdown_rx));

        let mut stream = None;
        for _ in 0..50 {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }
        let mut stream = stream.expect("metrics server did not start");
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("radioserver_connections_total 1"));

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
