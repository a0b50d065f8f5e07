//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] radioserver_protocol::ProtocolError),

    #[error("front-end error: {0}")]
    Frontend(#[from] radioserver_core::FrontendError),

    #[error("setting rejected: {0}")]
    Setting(#[from] radioserver_core::SettingError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("server shutting down")]
    ShuttingDown,

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ServerError {
    /// Returns whether the error ends only the current connection.
    pub fn is_connection_error(&self) -> bool {
        match self {
            ServerError::Io(_) | ServerError::ConnectionClosed => true,
            ServerError::Protocol(e) => e.is_fatal(),
            _ => false,
        }
    }
}
