//! Core error types.

use radioserver_protocol::SettingId;
use thiserror::Error;

/// Errors reported by a front-end's control interface.
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("front-end not initialized")]
    NotInitialized,

    #[error("front-end already running")]
    AlreadyRunning,

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: u64 },

    #[error("device error: {0}")]
    Device(String),
}

/// Channel generator errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("no frequency translator configured for IQ or FFT")]
    NoTranslator,

    #[error("channel worker requires a tokio runtime")]
    NoRuntime,
}

/// Rejected `SET_SETTING` requests. Rejection never mutates state.
#[derive(Debug, Error)]
pub enum SettingError {
    #[error("unknown setting id: {0}")]
    UnknownSetting(u32),

    #[error("missing argument for {}", .0.name())]
    MissingArgument(SettingId),

    #[error("{} out of range: {value} not in [{min}, {max}]", .setting.name())]
    OutOfRange {
        setting: SettingId,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{} not permitted: server has no device control", .0.name())]
    NotPermitted(SettingId),

    #[error("{} is a device setting", .0.name())]
    NotChannelSetting(SettingId),

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("front-end error: {0}")]
    Frontend(#[from] FrontendError),
}

impl SettingError {
    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            SettingError::UnknownSetting(_) => "unknown_setting",
            SettingError::MissingArgument(_) => "missing_argument",
            SettingError::OutOfRange { .. } => "out_of_range",
            SettingError::NotPermitted(_) => "not_permitted",
            SettingError::NotChannelSetting(_) => "not_channel_setting",
            SettingError::Channel(_) => "channel",
            SettingError::Frontend(_) => "frontend",
        }
    }
}
