//! # radioserver-server
//!
//! TCP server for radioserver.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Command framing and dispatch
//! - Per-client state and the shared server state
//! - Prometheus metrics endpoint

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod state;

pub use client::{ClientState, ClientStats, Outbound};
pub use config::{
    Config, ConfigError, DeviceConfig, DeviceKind, MetricsConfig, NetworkConfig, PipelineConfig,
};
pub use error::ServerError;
pub use handler::CommandHandler;
pub use metrics::Metrics;
pub use server::{Server, ServerConfig, ServerStats};
pub use state::ServerState;
