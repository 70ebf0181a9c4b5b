//! Frame codec: turns a byte stream into [`Frame`]s and back.
//!
//! # Wire format
//!
//! ```text
//! [payload bytes][suffix tag][~]
//! ```
//!
//! The delimiter `~` never occurs inside a payload; the suffix tag
//! (`CONNECT`, `MESSAGE`, `DISCONNECTED_CLIENT`, `DISCONNECTED_SERVER`, or
//! nothing for a bare relay line) identifies the frame kind.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{DELIMITER, MAX_FRAME_LEN};
use crate::error::ProtocolError;
use crate::frame::{Frame, FrameKind};

/// Encodes `payload` with the tag of `kind` and the trailing delimiter.
pub fn encode(kind: FrameKind, payload: &str) -> Result<Bytes, ProtocolError> {
    let mut dst = BytesMut::with_capacity(payload.len() + kind.tag().len() + 1);
    encode_into(kind, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Encodes a [`Frame`] into a standalone buffer.
pub fn encode_frame(frame: &Frame) -> Result<Bytes, ProtocolError> {
    encode(frame.kind, &frame.payload)
}

/// Decodes one frame from the front of `src`.
///
/// Returns `Ok(None)` while no delimiter has arrived; the bytes stay in
/// `src` for the next call.
pub fn decode(src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    FrameCodec::new().decode(src)
}

fn encode_into(kind: FrameKind, payload: &str, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    if payload.as_bytes().contains(&DELIMITER) {
        return Err(ProtocolError::InvalidPayload(format!(
            "payload contains the frame delimiter {:?}",
            DELIMITER as char
        )));
    }

    let tag = kind.tag();
    dst.reserve(payload.len() + tag.len() + 1);
    dst.put_slice(payload.as_bytes());
    dst.put_slice(tag.as_bytes());
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Stateful codec for use with a read loop or `tokio_util::codec` adapters.
///
/// Remembers how far the accumulation has already been scanned so a frame
/// arriving in many small reads is not rescanned from the start each time.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    next_index: usize,
    max_len: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            next_index: 0,
            max_len,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let start = self.next_index.min(src.len());
        let Some(offset) = src[start..].iter().position(|b| *b == DELIMITER) else {
            self.next_index = src.len();
            if src.len() > self.max_len {
                return Err(ProtocolError::FrameTooLong {
                    len: src.len(),
                    max: self.max_len,
                });
            }
            return Ok(None);
        };

        let end = start + offset;
        self.next_index = 0;
        if end > self.max_len {
            return Err(ProtocolError::FrameTooLong {
                len: end,
                max: self.max_len,
            });
        }
        let line = src.split_to(end + 1);

        let body = String::from_utf8_lossy(&line[..end]);
        let (kind, payload) = FrameKind::classify(&body);
        Ok(Some(Frame::new(kind, payload)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_into(frame.kind, &frame.payload, dst)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_into(frame.kind, &frame.payload, dst)
    }
}
