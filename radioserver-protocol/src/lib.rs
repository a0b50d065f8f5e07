//! # radioserver-protocol
//!
//! Wire protocol implementation for radioserver (SpyServer compatible).
//!
//! This crate provides:
//! - Fixed-size little-endian message and command headers
//! - A fragmentation-tolerant frame parser for both directions
//! - Command and message body encoding/decoding
//! - Sample format conversion and payload segmentation
//! - Protocol constants and enumerations

pub mod error;
pub mod header;
pub mod message;
pub mod parser;
pub mod sample;

pub use error::ProtocolError;
pub use header::{CommandHeader, FrameHeader, MessageHeader, Version};
pub use message::{
    ClientSync, Command, CommandType, DeviceInfo, DeviceType, MessageType, ReadSetting,
    SettingId, StreamFormat, StreamMode,
};
pub use parser::{CommandParser, Frame, FrameParser, MessageParser, ParserPhase};
pub use sample::{FftEncoder, FftScale, IqEncoder, SampleKind, Segments};

/// Server version announced in every message header.
pub const SERVER_VERSION: Version = Version::new(2, 0, 1700);

/// Default port for radioserver.
pub const DEFAULT_PORT: u16 = 5555;

/// Maximum body size of any frame, in either direction (1 MiB).
pub const MAX_BODY_SIZE: u32 = 1 << 20;

/// Minimum accepted FFT display width.
pub const FFT_MIN_DISPLAY_PIXELS: u32 = 100;

/// Maximum accepted FFT display width.
pub const FFT_MAX_DISPLAY_PIXELS: u32 = 1 << 15;

/// FFT display width assigned to new clients.
pub const DEFAULT_FFT_DISPLAY_PIXELS: u32 = 2000;

/// Minimum FFT dB range.
pub const FFT_MIN_DB_RANGE: u32 = 10;

/// Maximum FFT dB range.
pub const FFT_MAX_DB_RANGE: u32 = 150;

/// FFT dB range assigned to new clients.
pub const DEFAULT_FFT_DB_RANGE: u32 = 127;

/// Largest accepted absolute FFT dB offset.
pub const FFT_MAX_DB_OFFSET: i32 = 100;
