//! Fragmentation-tolerant frame parser.
//!
//! The parser is a two-phase state machine. In `AcquiringHeader` it fills a
//! fixed header buffer; once complete, the announced body is read in
//! `ReadingData`. Phase, cursor and partial buffers survive between calls, so
//! a byte stream split at any boundary yields the same frames as the stream
//! fed in one piece.

use crate::error::ProtocolError;
use crate::header::{CommandHeader, FrameHeader, MessageHeader};
use crate::message::Command;
use crate::MAX_BODY_SIZE;
use bytes::{Bytes, BytesMut};

/// Current parser phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserPhase {
    AcquiringHeader,
    ReadingData,
}

/// A complete frame: header plus its whole body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<H> {
    pub header: H,
    pub body: Bytes,
}

impl Frame<CommandHeader> {
    /// Decodes the frame body as a client command.
    pub fn command(&self) -> Result<Command, ProtocolError> {
        Command::decode(&self.header, &self.body)
    }
}

/// Parser for client to server command frames.
pub type CommandParser = FrameParser<CommandHeader>;

/// Parser for server to client message frames.
pub type MessageParser = FrameParser<MessageHeader>;

/// Incremental frame parser over a fixed-size header type.
#[derive(Debug)]
pub struct FrameParser<H: FrameHeader> {
    phase: ParserPhase,
    cursor: usize,
    header_buf: Box<[u8]>,
    header: Option<H>,
    body: BytesMut,
    max_body_size: u32,
    frames_decoded: u64,
}

impl<H: FrameHeader> FrameParser<H> {
    pub fn new() -> Self {
        Self::with_max_body_size(MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(max_body_size: u32) -> Self {
        Self {
            phase: ParserPhase::AcquiringHeader,
            cursor: 0,
            header_buf: vec![0u8; H::SIZE].into_boxed_slice(),
            header: None,
            body: BytesMut::new(),
            max_body_size,
            frames_decoded: 0,
        }
    }

    /// Consumes bytes from `input` until one frame completes or the input runs out.
    ///
    /// Returns `Ok(Some(frame))` as soon as a frame is complete, leaving the
    /// remaining bytes in `input`; callers loop until `Ok(None)`. A header
    /// announcing a body larger than the configured maximum is an error and
    /// the stream cannot be resynchronised.
    pub fn advance(&mut self, input: &mut &[u8]) -> Result<Option<Frame<H>>, ProtocolError> {
        while !input.is_empty() {
            match self.phase {
                ParserPhase::AcquiringHeader => {
                    let take = (H::SIZE - self.cursor).min(input.len());
                    self.header_buf[self.cursor..self.cursor + take]
                        .copy_from_slice(&input[..take]);
                    *input = &input[take..];
                    self.cursor += take;

                    if self.cursor < H::SIZE {
                        continue;
                    }

                    self.cursor = 0;
                    let header = H::decode(&self.header_buf);
                    let body_size = header.body_size();
                    if body_size > self.max_body_size {
                        return Err(ProtocolError::BodyTooLarge {
                            size: body_size,
                            max: self.max_body_size,
                        });
                    }

                    if body_size == 0 {
                        self.frames_decoded += 1;
                        return Ok(Some(Frame {
                            header,
                            body: Bytes::new(),
                        }));
                    }

                    self.body = BytesMut::with_capacity(body_size as usize);
                    self.body.resize(body_size as usize, 0);
                    self.header = Some(header);
                    self.phase = ParserPhase::ReadingData;
                }
                ParserPhase::ReadingData => {
                    let take = (self.body.len() - self.cursor).min(input.len());
                    self.body[self.cursor..self.cursor + take].copy_from_slice(&input[..take]);
                    *input = &input[take..];
                    self.cursor += take;

                    if self.cursor < self.body.len() {
                        continue;
                    }

                    self.cursor = 0;
                    self.phase = ParserPhase::AcquiringHeader;
                    if let Some(header) = self.header.take() {
                        self.frames_decoded += 1;
                        return Ok(Some(Frame {
                            header,
                            body: self.body.split().freeze(),
                        }));
                    }
                }
            }
        }

        Ok(None)
    }

    /// Feeds a whole buffer and collects every frame it completes.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame<H>>, ProtocolError> {
        let mut input = data;
        let mut frames = Vec::new();
        while let Some(frame) = self.advance(&mut input)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn phase(&self) -> ParserPhase {
        self.phase
    }

    /// Bytes received so far for the header or body being assembled.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.phase = ParserPhase::AcquiringHeader;
        self.cursor = 0;
        self.header = None;
        self.body.clear();
    }
}

impl<H: FrameHeader> Default for FrameParser<H> {
    fn default() -> Self {
        Self::new()
    }
}
