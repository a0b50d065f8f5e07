//! Sample conversion to negotiated wire formats, and payload segmentation.
//!
//! A stream format is resolved to an encoder once, when the client selects
//! it. Encoders live in a static table keyed by format, so the per-block path
//! is a plain function pointer call.

use crate::message::{MessageType, StreamFormat};
use crate::MAX_BODY_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use num_complex::Complex32;

/// The fixed set of sample representations the server handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Uint8,
    Int16,
    Int24,
    Float32,
    /// Native representation produced by the front-end and the DSP chain.
    ComplexFloat,
}

impl SampleKind {
    /// Encoded size of one real value.
    pub fn value_size(&self) -> usize {
        match self {
            SampleKind::Uint8 => 1,
            SampleKind::Int16 => 2,
            SampleKind::Int24 => 3,
            SampleKind::Float32 => 4,
            SampleKind::ComplexFloat => 8,
        }
    }
}

type EncodeFn = fn(&[Complex32], &mut BytesMut);

/// Converts complex samples to an interleaved I/Q wire format.
#[derive(Debug, Clone, Copy)]
pub struct IqEncoder {
    pub format: StreamFormat,
    pub kind: SampleKind,
    pub message_type: MessageType,
    encode: EncodeFn,
}

static IQ_ENCODERS: [IqEncoder; 4] = [
    IqEncoder {
        format: StreamFormat::Uint8,
        kind: SampleKind::Uint8,
        message_type: MessageType::Uint8Iq,
        encode: encode_uint8,
    },
    IqEncoder {
        format: StreamFormat::Int16,
        kind: SampleKind::Int16,
        message_type: MessageType::Int16Iq,
        encode: encode_int16,
    },
    IqEncoder {
        format: StreamFormat::Int24,
        kind: SampleKind::Int24,
        message_type: MessageType::Int24Iq,
        encode: encode_int24,
    },
    IqEncoder {
        format: StreamFormat::Float,
        kind: SampleKind::Float32,
        message_type: MessageType::FloatIq,
        encode: encode_float,
    },
];

impl IqEncoder {
    /// Looks up the encoder for a format. Unset and unsupported formats have none.
    pub fn resolve(format: StreamFormat) -> Option<&'static IqEncoder> {
        IQ_ENCODERS.iter().find(|e| e.format == format)
    }

    /// Encoded body length for `samples` complex values.
    pub fn body_len(&self, samples: usize) -> usize {
        samples * 2 * self.kind.value_size()
    }

    pub fn encode(&self, samples: &[Complex32]) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.body_len(samples.len()));
        (self.encode)(samples, &mut buf);
        buf.freeze()
    }
}

fn to_uint8(x: f32) -> u8 {
    (x * 127.0 + 127.5).clamp(0.0, 255.0) as u8
}

fn to_int16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn to_int24(x: f32) -> i32 {
    (x.clamp(-1.0, 1.0) * 8_388_607.0) as i32
}

fn encode_uint8(samples: &[Complex32], buf: &mut BytesMut) {
    for s in samples {
        buf.put_u8(to_uint8(s.re));
        buf.put_u8(to_uint8(s.im));
    }
}

fn encode_int16(samples: &[Complex32], buf: &mut BytesMut) {
    for s in samples {
        buf.put_i16_le(to_int16(s.re));
        buf.put_i16_le(to_int16(s.im));
    }
}

fn encode_int24(samples: &[Complex32], buf: &mut BytesMut) {
    for s in samples {
        buf.put_slice(&to_int24(s.re).to_le_bytes()[..3]);
        buf.put_slice(&to_int24(s.im).to_le_bytes()[..3]);
    }
}

fn encode_float(samples: &[Complex32], buf: &mut BytesMut) {
    for s in samples {
        buf.put_f32_le(s.re);
        buf.put_f32_le(s.im);
    }
}

/// Display scaling for FFT frames.
///
/// `offset` dB maps to the top of the scale and `offset - range` dB to the bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FftScale {
    pub offset: i32,
    pub range: u32,
}

impl FftScale {
    pub fn to_uint8(&self, db: f32) -> u8 {
        let range = self.range.max(1) as f32;
        let floor = self.offset as f32 - range;
        ((db - floor) / range * 255.0).clamp(0.0, 255.0) as u8
    }
}

/// Converts power spectra (dB per display bin) to an FFT wire format.
#[derive(Debug, Clone, Copy)]
pub struct FftEncoder {
    pub format: StreamFormat,
    pub message_type: MessageType,
}

impl FftEncoder {
    /// Only 8-bit FFT frames are produced; 4-bit and compressed frames are not.
    pub fn resolve(format: StreamFormat) -> Option<FftEncoder> {
        match format {
            StreamFormat::Uint8 => Some(FftEncoder {
                format,
                message_type: MessageType::Uint8Fft,
            }),
            _ => None,
        }
    }

    pub fn encode(&self, bins_db: &[f32], scale: FftScale) -> Bytes {
        let mut buf = BytesMut::with_capacity(bins_db.len());
        for &db in bins_db {
            buf.put_u8(scale.to_uint8(db));
        }
        buf.freeze()
    }
}

/// Splits a payload into bodies no larger than the maximum body size.
#[derive(Debug)]
pub struct Segments {
    remaining: Bytes,
    max: usize,
}

impl Segments {
    pub fn new(payload: Bytes) -> Self {
        Self::with_max(payload, MAX_BODY_SIZE as usize)
    }

    pub fn with_max(payload: Bytes, max: usize) -> Self {
        Self {
            remaining: payload,
            max: max.max(1),
        }
    }
}

impl Iterator for Segments {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining.is_empty() {
            return None;
        }
        let take = self.remaining.len().min(self.max);
        Some(self.remaining.split_to(take))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len().div_ceil(self.max);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Segments {}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    #[test]
    fn test_resolve_table() {
        assert!(IqEncoder::resolve(StreamFormat::Invalid).is_none());
        assert!(IqEncoder::resolve(StreamFormat::Dint4).is_none());

        let enc = IqEncoder::resolve(StreamFormat::Int24).unwrap();
        assert_eq!(enc.kind, SampleKind::Int24);
        assert_eq!(enc.message_type, MessageType::Int24Iq);
        assert_eq!(enc.body_len(10), 60);
    }

    #[test]
    fn test_uint8_conversion() {
        let enc = IqEncoder::resolve(StreamFormat::Uint8).unwrap();
        let body = enc.encode(&[c(-1.0, 0.0), c(1.0, 2.0)]);
        assert_eq!(&body[..], &[0, 127, 254, 255]);
    }

    #[test]
    fn test_int16_conversion() {
        let enc = IqEncoder::resolve(StreamFormat::Int16).unwrap();
        let body = enc.encode(&[c(1.0, -1.0)]);
        assert_eq!(&body[..], &[0xFF, 0x7F, 0x01, 0x80]);
    }

    #[test]
    fn test_int24_conversion() {
        let enc = IqEncoder::resolve(StreamFormat::Int24).unwrap();
        let body = enc.encode(&[c(1.0, -1.0)]);
        assert_eq!(&body[..], &[0xFF, 0xFF, 0x7F, 0x01, 0x00, 0x80]);
    }

    #[test]
    fn test_float_conversion() {
        let enc = IqEncoder::resolve(StreamFormat::Float).unwrap();
        let body = enc.encode(&[c(0.5, -0.25)]);
        assert_eq!(body.len(), 8);
        assert_eq!(&body[0..4], &0.5f32.to_le_bytes());
        assert_eq!(&body[4..8], &(-0.25f32).to_le_bytes());
    }

    #[test]
    fn test_fft_scale() {
        let scale = FftScale {
            offset: 0,
            range: 100,
        };
        assert_eq!(scale.to_uint8(0.0), 255);
        assert_eq!(scale.to_uint8(10.0), 255);
        assert_eq!(scale.to_uint8(-100.0), 0);
        assert_eq!(scale.to_uint8(-150.0), 0);
        assert_eq!(scale.to_uint8(-50.0), 127);
    }

    #[test]
    fn test_fft_encoder_formats() {
        assert!(FftEncoder::resolve(StreamFormat::Int16).is_none());
        assert!(FftEncoder::resolve(StreamFormat::Dint4).is_none());

        let enc = FftEncoder::resolve(StreamFormat::Uint8).unwrap();
        assert_eq!(enc.message_type, MessageType::Uint8Fft);
        let body = enc.encode(
            &[-200.0, -20.0, 20.0],
            FftScale {
                offset: 20,
                range: 40,
            },
        );
        assert_eq!(&body[..], &[0, 0, 255]);
    }

    #[test]
    fn test_segmentation() {
        let max = MAX_BODY_SIZE as usize;
        let payload = Bytes::from(vec![7u8; max * 2 + max / 2]);
        let segments: Vec<Bytes> = Segments::new(payload).collect();

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), max);
        assert_eq!(segments[1].len(), max);
        assert_eq!(segments[2].len(), max / 2);
    }

    #[test]
    fn test_small_payload_is_one_segment() {
        let segments = Segments::with_max(Bytes::from_static(b"abc"), 16);
        assert_eq!(segments.len(), 1);
        assert_eq!(Segments::new(Bytes::new()).count(), 0);
    }
}
