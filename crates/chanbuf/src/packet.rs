//! # Packet Buffer
//!
//! One outbound datagram under construction. Messages are appended until the
//! buffer reports no space, then the whole buffer is handed to the transport
//! in a single call.

use bytes::BytesMut;

use crate::transport::Transport;

/// Bytes reserved per packet for transport framing. Taken off the configured
/// packet size to get the usable channel payload.
pub const PACKET_HEADER_RESERVE: usize = 100;

/// Fixed-capacity outbound packet.
#[derive(Debug)]
pub struct PacketBuffer {
    data: BytesMut,
    capacity: usize,
    reliable: bool,
    /// Number of `write` calls since the last clear.
    messages: usize,
}

impl PacketBuffer {
    /// Allocate an empty packet holding at most `capacity` payload bytes.
    pub fn new(capacity: usize, reliable: bool) -> Self {
        PacketBuffer {
            data: BytesMut::with_capacity(capacity),
            capacity,
            reliable,
            messages: 0,
        }
    }

    /// Whether `n` more bytes fit without exceeding capacity.
    #[inline]
    pub fn has_space(&self, n: usize) -> bool {
        n <= self.remaining()
    }

    /// Append `bytes`.
    ///
    /// # Panics
    ///
    /// If the bytes do not fit. Callers check [`has_space`] first.
    ///
    /// [`has_space`]: PacketBuffer::has_space
    #[inline]
    pub fn write(&mut self, bytes: &[u8]) {
        assert!(
            self.has_space(bytes.len()),
            "packet overflow: {} + {} > {}",
            self.data.len(),
            bytes.len(),
            self.capacity
        );
        self.data.extend_from_slice(bytes);
        self.messages += 1;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Messages written since the last clear.
    #[inline]
    pub fn messages(&self) -> usize {
        self.messages
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    #[inline]
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// The payload written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Discard the contents, keeping the allocation.
    pub fn reset(&mut self) {
        self.data.clear();
        self.messages = 0;
    }

    /// Clear and re-purpose a recycled buffer for another channel.
    pub fn reshape(&mut self, capacity: usize, reliable: bool) {
        self.reset();
        if self.data.capacity() < capacity {
            self.data.reserve(capacity);
        }
        self.capacity = capacity;
        self.reliable = reliable;
    }

    /// Hand the payload to the transport.
    ///
    /// On acceptance the buffer is cleared and `true` is returned. On
    /// rejection a reliable buffer keeps its payload for a later retry, while
    /// an unreliable buffer drops it. An empty buffer never reaches the
    /// transport.
    pub fn send_to_transport(&mut self, transport: &mut dyn Transport, channel_id: u8) -> bool {
        if self.data.is_empty() {
            return true;
        }
        if transport.send(channel_id, &self.data) {
            self.reset();
            return true;
        }
        if !self.reliable {
            self.reset();
        }
        false
    }
}
