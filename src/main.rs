//! radioserver - SpyServer compatible radio sample server
//!
//! Shares one SDR front-end with many TCP clients, each with its own
//! channel frequency, decimation, sample format and FFT display.

use radioserver_core::{Frontend, SimulatedFrontend};
use radioserver_server::metrics::run_metrics_server;
use radioserver_server::{Config, DeviceKind, Metrics, Server, ServerConfig, ServerState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if RADIOSERVER_CONFIG is set, then env overrides)
    let config_path = std::env::var("RADIOSERVER_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting radioserver");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let frontend: Arc<dyn Frontend> = match config.device.kind {
        DeviceKind::Simulated => Arc::new(SimulatedFrontend::new(config.device.simulated_config())),
    };

    let metrics = if config.metrics.enabled {
        Some(Arc::new(Metrics::new()?))
    } else {
        None
    };

    // The sample callback is registered here, before the device produces anything.
    let state = ServerState::new(
        frontend.clone(),
        config.device.can_control,
        config.channel.channel_config(),
        metrics.clone(),
    );

    frontend.init()?;
    tracing::info!("  Device: {}", frontend.name());
    tracing::info!(
        "  Center frequency: {} Hz, sample rate: {} Hz",
        frontend.center_frequency(),
        frontend.sample_rate()
    );
    tracing::info!(
        "  Control: {}",
        if config.device.can_control {
            "allowed"
        } else {
            "read-only"
        }
    );
    frontend.start()?;

    let server = Arc::new(Server::new(
        ServerConfig::from_network(&config.network),
        state,
    ));

    // Spawn metrics server
    let metrics_handle = metrics.map(|metrics| {
        let addr = config.metrics.bind_addr;
        let shutdown = server.subscribe_shutdown();
        tracing::info!("  Metrics: http://{}/metrics", addr);
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server failed: {}", e);
            }
        })
    });

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    let result = server.run().await;

    frontend.stop();
    frontend.destroy();
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    result?;
    tracing::info!("Server stopped");
    Ok(())
}
