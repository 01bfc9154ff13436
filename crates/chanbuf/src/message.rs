//! # Message Framing
//!
//! Every message placed in a packet carries a 4-byte envelope:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Body Length (16, LE)      |    Message Type (16, LE)      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Body ...                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Several framed messages are concatenated into one packet;
//! [`MessageReader`] splits them back apart on the receiving side.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ChannelError;

/// Envelope size: body length + message type.
pub const FRAME_HEADER_SIZE: usize = 4;

// ─── NetMessage ─────────────────────────────────────────────────────────────

/// Application message that can write its body into a [`MessageWriter`].
pub trait NetMessage {
    fn serialize(&self, writer: &mut MessageWriter) -> Result<(), ChannelError>;
}

impl NetMessage for [u8] {
    fn serialize(&self, writer: &mut MessageWriter) -> Result<(), ChannelError> {
        writer.put_slice(self);
        Ok(())
    }
}

impl NetMessage for Vec<u8> {
    fn serialize(&self, writer: &mut MessageWriter) -> Result<(), ChannelError> {
        self.as_slice().serialize(writer)
    }
}

impl NetMessage for Bytes {
    fn serialize(&self, writer: &mut MessageWriter) -> Result<(), ChannelError> {
        self.as_ref().serialize(writer)
    }
}

impl NetMessage for str {
    fn serialize(&self, writer: &mut MessageWriter) -> Result<(), ChannelError> {
        self.as_bytes().serialize(writer)
    }
}

impl<M: NetMessage + ?Sized> NetMessage for &M {
    fn serialize(&self, writer: &mut MessageWriter) -> Result<(), ChannelError> {
        (**self).serialize(writer)
    }
}

// ─── MessageWriter ──────────────────────────────────────────────────────────

/// Reusable scratch buffer that frames one message at a time.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MessageWriter {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Discard any previous content and open an envelope for `msg_type`.
    pub fn start_message(&mut self, msg_type: u16) {
        self.buf.clear();
        self.buf.put_u16_le(0);
        self.buf.put_u16_le(msg_type);
    }

    /// Patch the body length into the envelope.
    pub fn finish_message(&mut self) -> Result<(), ChannelError> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Err(ChannelError::Serialize("finish without start".into()));
        }
        let body = self.buf.len() - FRAME_HEADER_SIZE;
        let len = u16::try_from(body).map_err(|_| ChannelError::MessageBodyTooLarge(body))?;
        self.buf[..2].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Frame `message` as `msg_type` in one step.
    pub fn frame<M: NetMessage + ?Sized>(
        &mut self,
        msg_type: u16,
        message: &M,
    ) -> Result<&[u8], ChannelError> {
        self.start_message(msg_type);
        message.serialize(self)?;
        self.finish_message()?;
        Ok(self.as_bytes())
    }

    /// The framed bytes (envelope + body).
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }
}

// ─── MessageReader ──────────────────────────────────────────────────────────

/// A message recovered from a received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u16,
    pub body: Bytes,
}

/// Iterator over the framed messages of one packet.
///
/// Yields `Err(MalformedFrame)` once and then stops if the packet ends in the
/// middle of a frame.
#[derive(Debug)]
pub struct MessageReader {
    buf: Bytes,
    offset: usize,
    failed: bool,
}

impl MessageReader {
    pub fn new(packet: Bytes) -> Self {
        MessageReader {
            buf: packet,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for MessageReader {
    type Item = Result<Frame, ChannelError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.buf.has_remaining() {
            return None;
        }
        if self.buf.remaining() < FRAME_HEADER_SIZE {
            self.failed = true;
            return Some(Err(ChannelError::MalformedFrame {
                offset: self.offset,
            }));
        }
        let body_len = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        if self.buf.remaining() < FRAME_HEADER_SIZE + body_len {
            self.failed = true;
            return Some(Err(ChannelError::MalformedFrame {
                offset: self.offset,
            }));
        }
        self.buf.advance(2);
        let msg_type = self.buf.get_u16_le();
        let body = self.buf.split_to(body_len);
        self.offset += FRAME_HEADER_SIZE + body_len;
        Some(Ok(Frame { msg_type, body }))
    }
}
