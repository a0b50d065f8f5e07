//! # radioserver-client
//!
//! Client library for radioserver and other SpyServer compatible servers.
//!
//! This crate provides:
//! - Async TCP connection with an incremental message parser
//! - High-level API for the handshake, settings and ping
//! - Access to the raw sample stream

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, Message};
pub use error::ClientError;
