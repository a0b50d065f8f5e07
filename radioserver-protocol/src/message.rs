//! Commands, messages and the enumerations they carry.

use crate::error::ProtocolError;
use crate::header::{CommandHeader, FrameHeader, Version};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Client to server command types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    Hello = 0,
    GetSetting = 1,
    SetSetting = 2,
    Ping = 3,
}

impl CommandType {
    pub fn name(&self) -> &'static str {
        match self {
            CommandType::Hello => "HELLO",
            CommandType::GetSetting => "GET_SETTING",
            CommandType::SetSetting => "SET_SETTING",
            CommandType::Ping => "PING",
        }
    }
}

impl TryFrom<u32> for CommandType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CommandType::Hello),
            1 => Ok(CommandType::GetSetting),
            2 => Ok(CommandType::SetSetting),
            3 => Ok(CommandType::Ping),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// Server to client message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    DeviceInfo = 0,
    ClientSync = 1,
    Pong = 2,
    ReadSetting = 3,

    Uint8Iq = 100,
    Int16Iq = 101,
    Int24Iq = 102,
    FloatIq = 103,
    CompressedIq = 104,

    Uint8Af = 200,
    Int16Af = 201,
    Int24Af = 202,
    FloatAf = 203,
    CompressedAf = 204,

    Dint4Fft = 300,
    Uint8Fft = 301,
    CompressedFft = 302,
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns whether the message carries sample data rather than status.
    pub fn is_sample_data(&self) -> bool {
        self.as_u32() >= 100
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageType::DeviceInfo,
            1 => MessageType::ClientSync,
            2 => MessageType::Pong,
            3 => MessageType::ReadSetting,
            100 => MessageType::Uint8Iq,
            101 => MessageType::Int16Iq,
            102 => MessageType::Int24Iq,
            103 => MessageType::FloatIq,
            104 => MessageType::CompressedIq,
            200 => MessageType::Uint8Af,
            201 => MessageType::Int16Af,
            202 => MessageType::Int24Af,
            203 => MessageType::FloatAf,
            204 => MessageType::CompressedAf,
            300 => MessageType::Dint4Fft,
            301 => MessageType::Uint8Fft,
            302 => MessageType::CompressedFft,
            other => return Err(ProtocolError::UnknownMessage(other)),
        })
    }
}

/// Streaming mode bitmask (also used as the header stream type).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamMode(u32);

impl StreamMode {
    /// Status messages (no stream bit set).
    pub const STATUS: u32 = 0;
    pub const IQ: u32 = 1 << 0;
    pub const AF: u32 = 1 << 1;
    pub const FFT: u32 = 1 << 2;

    const VALID_MASK: u32 = Self::IQ | Self::AF | Self::FFT;

    pub const fn iq_only() -> Self {
        Self(Self::IQ)
    }

    pub fn has_iq(&self) -> bool {
        self.0 & Self::IQ != 0
    }

    pub fn has_af(&self) -> bool {
        self.0 & Self::AF != 0
    }

    pub fn has_fft(&self) -> bool {
        self.0 & Self::FFT != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Accepts a nonzero combination of the known stream bits.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits == 0 || bits & !Self::VALID_MASK != 0 {
            return None;
        }
        Some(Self(bits))
    }
}

/// Setting identifiers accepted by `SET_SETTING` and `GET_SETTING`.
///
/// Conversion from `u32` doubles as the allow-list: ids outside this enum
/// are rejected before any state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SettingId {
    StreamingMode = 0,
    StreamingEnabled = 1,
    Gain = 2,

    IqFormat = 100,
    IqFrequency = 101,
    IqDecimation = 102,

    FftFormat = 200,
    FftFrequency = 201,
    FftDecimation = 202,
    FftDbOffset = 203,
    FftDbRange = 204,
    FftDisplayPixels = 205,
}

impl SettingId {
    pub const ALL: [SettingId; 12] = [
        SettingId::StreamingMode,
        SettingId::StreamingEnabled,
        SettingId::Gain,
        SettingId::IqFormat,
        SettingId::IqFrequency,
        SettingId::IqDecimation,
        SettingId::FftFormat,
        SettingId::FftFrequency,
        SettingId::FftDecimation,
        SettingId::FftDbOffset,
        SettingId::FftDbRange,
        SettingId::FftDisplayPixels,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettingId::StreamingMode => "Streaming Mode",
            SettingId::StreamingEnabled => "Streaming Enabled",
            SettingId::Gain => "Gain",
            SettingId::IqFormat => "IQ Format",
            SettingId::IqFrequency => "IQ Frequency",
            SettingId::IqDecimation => "IQ Decimation",
            SettingId::FftFormat => "FFT Format",
            SettingId::FftFrequency => "FFT Frequency",
            SettingId::FftDecimation => "FFT Decimation",
            SettingId::FftDbOffset => "FFT dB Offset",
            SettingId::FftDbRange => "FFT dB Range",
            SettingId::FftDisplayPixels => "FFT Display Pixels",
        }
    }

    /// Settings that change the shared front-end and therefore every client's view.
    pub fn affects_global(&self) -> bool {
        matches!(self, SettingId::Gain)
    }
}

impl TryFrom<u32> for SettingId {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        SettingId::ALL
            .iter()
            .copied()
            .find(|id| id.as_u32() == value)
            .ok_or(value)
    }
}

/// Sample stream formats negotiated per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StreamFormat {
    #[default]
    Invalid = 0,
    Uint8 = 1,
    Int16 = 2,
    Int24 = 3,
    Float = 4,
    Dint4 = 5,
}

impl StreamFormat {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => StreamFormat::Invalid,
            1 => StreamFormat::Uint8,
            2 => StreamFormat::Int16,
            3 => StreamFormat::Int24,
            4 => StreamFormat::Float,
            5 => StreamFormat::Dint4,
            _ => return None,
        })
    }
}

/// Front-end device families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeviceType {
    #[default]
    Invalid = 0,
    AirspyOne = 1,
    AirspyHf = 2,
    Rtlsdr = 3,
    LimeSdrUsb = 10000,
    LimeSdrMini = 10001,
    SpyServer = 10002,
    HackRf = 10003,
}

impl DeviceType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceType::Invalid => "Invalid Device",
            DeviceType::AirspyOne => "Airspy Mini / R2",
            DeviceType::AirspyHf => "Airspy HF / HF+",
            DeviceType::Rtlsdr => "RTLSDR",
            DeviceType::LimeSdrUsb => "LimeSDR USB",
            DeviceType::LimeSdrMini => "LimeSDR Mini",
            DeviceType::SpyServer => "SpyServer",
            DeviceType::HackRf => "HackRF",
        }
    }
}

fn ensure_len(body: &[u8], needed: usize, what: &'static str) -> Result<(), ProtocolError> {
    if body.len() < needed {
        return Err(ProtocolError::Truncated {
            what,
            needed,
            got: body.len(),
        });
    }
    Ok(())
}

/// Device capability snapshot sent in reply to `HELLO`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: u32,
    pub device_serial: u32,
    pub maximum_sample_rate: u32,
    pub maximum_bandwidth: u32,
    pub decimation_stage_count: u32,
    pub gain_stage_count: u32,
    pub maximum_gain_index: u32,
    pub minimum_frequency: u32,
    pub maximum_frequency: u32,
}

impl DeviceInfo {
    pub const SIZE: usize = 36;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        for value in [
            self.device_type,
            self.device_serial,
            self.maximum_sample_rate,
            self.maximum_bandwidth,
            self.decimation_stage_count,
            self.gain_stage_count,
            self.maximum_gain_index,
            self.minimum_frequency,
            self.maximum_frequency,
        ] {
            buf.put_u32_le(value);
        }
        buf.freeze()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(body, Self::SIZE, "device info")?;
        Ok(Self {
            device_type: body.get_u32_le(),
            device_serial: body.get_u32_le(),
            maximum_sample_rate: body.get_u32_le(),
            maximum_bandwidth: body.get_u32_le(),
            decimation_stage_count: body.get_u32_le(),
            gain_stage_count: body.get_u32_le(),
            maximum_gain_index: body.get_u32_le(),
            minimum_frequency: body.get_u32_le(),
            maximum_frequency: body.get_u32_le(),
        })
    }
}

/// Per-client synchronization status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientSync {
    pub can_control: u32,
    pub gain: u32,
    pub device_center_frequency: u32,
    pub iq_center_frequency: u32,
    pub fft_center_frequency: u32,
    pub minimum_iq_center_frequency: u32,
    pub maximum_iq_center_frequency: u32,
    pub minimum_fft_center_frequency: u32,
    pub maximum_fft_center_frequency: u32,
}

impl ClientSync {
    pub const SIZE: usize = 36;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        for value in [
            self.can_control,
            self.gain,
            self.device_center_frequency,
            self.iq_center_frequency,
            self.fft_center_frequency,
            self.minimum_iq_center_frequency,
            self.maximum_iq_center_frequency,
            self.minimum_fft_center_frequency,
            self.maximum_fft_center_frequency,
        ] {
            buf.put_u32_le(value);
        }
        buf.freeze()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(body, Self::SIZE, "client sync")?;
        Ok(Self {
            can_control: body.get_u32_le(),
            gain: body.get_u32_le(),
            device_center_frequency: body.get_u32_le(),
            iq_center_frequency: body.get_u32_le(),
            fft_center_frequency: body.get_u32_le(),
            minimum_iq_center_frequency: body.get_u32_le(),
            maximum_iq_center_frequency: body.get_u32_le(),
            minimum_fft_center_frequency: body.get_u32_le(),
            maximum_fft_center_frequency: body.get_u32_le(),
        })
    }
}

/// Reply to `GET_SETTING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSetting {
    pub setting: u32,
    pub status: u32,
    pub value: u32,
}

impl ReadSetting {
    pub const SIZE: usize = 12;
    pub const STATUS_OK: u32 = 0;
    pub const STATUS_UNKNOWN_SETTING: u32 = 1;
    pub const STATUS_MALFORMED: u32 = 2;

    pub fn ok(setting: SettingId, value: u32) -> Self {
        Self {
            setting: setting.as_u32(),
            status: Self::STATUS_OK,
            value,
        }
    }

    pub fn unknown(setting: u32) -> Self {
        Self {
            setting,
            status: Self::STATUS_UNKNOWN_SETTING,
            value: 0,
        }
    }

    /// Reply to a request whose body carried no setting id.
    pub fn malformed() -> Self {
        Self {
            setting: 0,
            status: Self::STATUS_MALFORMED,
            value: 0,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32_le(self.setting);
        buf.put_u32_le(self.status);
        buf.put_u32_le(self.value);
        buf.freeze()
    }

    pub fn decode(mut body: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(body, Self::SIZE, "read setting")?;
        Ok(Self {
            setting: body.get_u32_le(),
            status: body.get_u32_le(),
            value: body.get_u32_le(),
        })
    }
}

/// Encodes a ping/pong timestamp body.
pub fn encode_timestamp(timestamp: i64) -> Bytes {
    Bytes::copy_from_slice(&timestamp.to_le_bytes())
}

/// Decodes a ping/pong timestamp body.
pub fn decode_timestamp(mut body: &[u8]) -> Result<i64, ProtocolError> {
    ensure_len(body, 8, "timestamp")?;
    Ok(body.get_i64_le())
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hello { version: Version, name: String },
    /// `None` when the body is too short to hold a setting id.
    GetSetting { setting: Option<u32> },
    /// The setting id is kept raw; the allow-list check belongs to the dispatcher.
    SetSetting { setting: u32, args: Vec<u32> },
    Ping { timestamp: i64 },
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Hello { .. } => CommandType::Hello,
            Command::GetSetting { .. } => CommandType::GetSetting,
            Command::SetSetting { .. } => CommandType::SetSetting,
            Command::Ping { .. } => CommandType::Ping,
        }
    }

    /// Decodes a command from its header and complete body.
    pub fn decode(header: &CommandHeader, mut body: &[u8]) -> Result<Self, ProtocolError> {
        match CommandType::try_from(header.command_type)? {
            CommandType::Hello => {
                ensure_len(body, 4, "hello body")?;
                let version = Version::from_protocol_id(body.get_u32_le());
                let name = String::from_utf8_lossy(body)
                    .trim_end_matches('\0')
                    .to_string();
                Ok(Command::Hello { version, name })
            }
            CommandType::GetSetting => Ok(Command::GetSetting {
                setting: (body.remaining() >= 4).then(|| body.get_u32_le()),
            }),
            CommandType::SetSetting => {
                ensure_len(body, 4, "set setting body")?;
                let setting = body.get_u32_le();
                let mut args = Vec::with_capacity(body.len() / 4);
                while body.remaining() >= 4 {
                    args.push(body.get_u32_le());
                }
                Ok(Command::SetSetting { setting, args })
            }
            CommandType::Ping => Ok(Command::Ping {
                timestamp: decode_timestamp(body)?,
            }),
        }
    }

    /// Encodes the command with its header, ready to be written to a socket.
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        match self {
            Command::Hello { version, name } => {
                body.put_u32_le(version.protocol_id());
                body.put_slice(name.as_bytes());
            }
            Command::GetSetting { setting } => {
                if let Some(setting) = setting {
                    body.put_u32_le(*setting);
                }
            }
            Command::SetSetting { setting, args } => {
                body.put_u32_le(*setting);
                for arg in args {
                    body.put_u32_le(*arg);
                }
            }
            Command::Ping { timestamp } => body.put_i64_le(*timestamp),
        }

        let header = CommandHeader {
            command_type: self.command_type() as u32,
            body_size: body.len() as u32,
        };
        let mut buf = BytesMut::with_capacity(CommandHeader::SIZE + body.len());
        header.encode(&mut buf);
        buf.extend_from_slice(&body);
        buf
    }
}
