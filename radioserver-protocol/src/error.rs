//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing or body decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: u32, max: u32 },

    #[error("unknown command type: {0}")]
    UnknownCommand(u32),

    #[error("unknown message type: {0}")]
    UnknownMessage(u32),

    #[error("truncated {what}: need {needed} bytes, got {got}")]
    Truncated {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the error leaves the byte stream unrecoverable.
    ///
    /// Body decoding errors only affect a single frame; an oversized frame
    /// desynchronises the stream and must close the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::BodyTooLarge { .. } | ProtocolError::Io(_))
    }
}
