//! Fixed-size frame headers.
//!
//! Every server message starts with a 20 byte header:
//!
//! ```text
//! +-------------+--------------+-------------+-----------------+-----------+
//! | protocol_id | message_type | stream_type | sequence_number | body_size |
//! |   4 bytes   |   4 bytes    |   4 bytes   |     4 bytes     |  4 bytes  |
//! +-------------+--------------+-------------+-----------------+-----------+
//! ```
//!
//! Every client command starts with an 8 byte header:
//!
//! ```text
//! +--------------+-----------+
//! | command_type | body_size |
//! |   4 bytes    |  4 bytes  |
//! +--------------+-----------+
//! ```
//!
//! All fields are little-endian `u32`.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// Protocol version triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
}

impl Version {
    pub const fn new(major: u8, minor: u8, revision: u16) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// Packs the version as `(major << 24) | (minor << 16) | revision`.
    pub const fn protocol_id(&self) -> u32 {
        ((self.major as u32) << 24) | ((self.minor as u32) << 16) | self.revision as u32
    }

    /// Unpacks a protocol id produced by [`Version::protocol_id`].
    pub const fn from_protocol_id(id: u32) -> Self {
        Self {
            major: (id >> 24) as u8,
            minor: (id >> 16) as u8,
            revision: id as u16,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// A fixed-size header that announces the length of the body following it.
pub trait FrameHeader: Copy + fmt::Debug {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decodes the header from exactly `SIZE` bytes.
    fn decode(buf: &[u8]) -> Self;

    /// Appends the encoded header to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Length of the body following this header.
    fn body_size(&self) -> u32;
}

/// Header preceding every server to client message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub protocol_id: u32,
    pub message_type: u32,
    pub stream_type: u32,
    pub sequence_number: u32,
    pub body_size: u32,
}

impl FrameHeader for MessageHeader {
    const SIZE: usize = 20;

    fn decode(mut buf: &[u8]) -> Self {
        Self {
            protocol_id: buf.get_u32_le(),
            message_type: buf.get_u32_le(),
            stream_type: buf.get_u32_le(),
            sequence_number: buf.get_u32_le(),
            body_size: buf.get_u32_le(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::SIZE);
        buf.put_u32_le(self.protocol_id);
        buf.put_u32_le(self.message_type);
        buf.put_u32_le(self.stream_type);
        buf.put_u32_le(self.sequence_number);
        buf.put_u32_le(self.body_size);
    }

    fn body_size(&self) -> u32 {
        self.body_size
    }
}

/// Header preceding every client to server command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandHeader {
    pub command_type: u32,
    pub body_size: u32,
}

impl FrameHeader for CommandHeader {
    const SIZE: usize = 8;

    fn decode(mut buf: &[u8]) -> Self {
        Self {
            command_type: buf.get_u32_le(),
            body_size: buf.get_u32_le(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(Self::SIZE);
        buf.put_u32_le(self.command_type);
        buf.put_u32_le(self.body_size);
    }

    fn body_size(&self) -> u32 {
        self.body_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_packing() {
        let version = Version::new(2, 0, 1700);
        assert_eq!(version.protocol_id(), (2 << 24) | 1700);
        assert_eq!(Version::from_protocol_id(version.protocol_id()), version);
        assert_eq!(version.to_string(), "2.0.1700");
    }

    #[test]
    fn test_message_header_roundtrip() {
        let header = MessageHeader {
            protocol_id: Version::new(2, 0, 1700).protocol_id(),
            message_type: 101,
            stream_type: 1,
            sequence_number: 0xDEAD_BEEF,
            body_size: 4096,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), MessageHeader::SIZE);

        let decoded = MessageHeader::decode(&buf);
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_message_header_is_little_endian() {
        let header = MessageHeader {
            protocol_id: 0x0102_0304,
            message_type: 1,
            stream_type: 0,
            sequence_number: 7,
            body_size: 36,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[4..8], &[1, 0, 0, 0]);
        assert_eq!(&buf[16..20], &[36, 0, 0, 0]);
    }

    #[test]
    fn test_command_header_layout() {
        let header = CommandHeader {
            command_type: 2,
            body_size: 8,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(&buf[..], &[2, 0, 0, 0, 8, 0, 0, 0]);
        assert_eq!(CommandHeader::decode(&buf), header);
    }
}
