//! # Transport Abstraction
//!
//! The channel layer never opens sockets. It hands finished packets to a
//! [`Transport`] and treats a `false` return as "no room right now, try again
//! later". Implementations must not block and must accept a retry of the
//! identical payload after a rejection.

use bytes::Bytes;

// ─── Transport ──────────────────────────────────────────────────────────────

/// Packet sink for one connection.
pub trait Transport {
    /// Offer one packet for `channel_id`. Returns `false` when the transport
    /// is transiently unable to accept more data.
    fn send(&mut self, channel_id: u8, payload: &[u8]) -> bool;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, channel_id: u8, payload: &[u8]) -> bool {
        (**self).send(channel_id, payload)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, channel_id: u8, payload: &[u8]) -> bool {
        (**self).send(channel_id, payload)
    }
}

// ─── ThrottledTransport ─────────────────────────────────────────────────────

/// A packet accepted by [`ThrottledTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub channel_id: u8,
    pub payload: Bytes,
}

/// In-memory transport that accepts a bounded number of packets per tick.
///
/// Used by the simulator and the tests to model a link that cannot drain as
/// fast as the application produces. `budget = None` accepts everything.
#[derive(Debug, Default)]
pub struct ThrottledTransport {
    budget: Option<usize>,
    remaining: Option<usize>,
    sent: Vec<SentPacket>,
    attempts: u64,
    rejections: u64,
}

impl ThrottledTransport {
    /// Transport that never rejects.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Transport that accepts `budget` packets between calls to [`refill`].
    ///
    /// [`refill`]: ThrottledTransport::refill
    pub fn with_budget(budget: usize) -> Self {
        ThrottledTransport {
            budget: Some(budget),
            remaining: Some(budget),
            ..Self::default()
        }
    }

    /// Change the per-tick budget and refill immediately.
    pub fn set_budget(&mut self, budget: Option<usize>) {
        self.budget = budget;
        self.remaining = budget;
    }

    /// Start a new tick: restore the full budget.
    pub fn refill(&mut self) {
        self.remaining = self.budget;
    }

    /// Packets accepted so far, in acceptance order.
    pub fn sent(&self) -> &[SentPacket] {
        &self.sent
    }

    /// Take the accepted packets, leaving the log empty.
    pub fn drain_sent(&mut self) -> Vec<SentPacket> {
        std::mem::take(&mut self.sent)
    }

    /// Total calls to [`Transport::send`], accepted or not.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Calls that were rejected for lack of budget.
    pub fn rejections(&self) -> u64 {
        self.rejections
    }
}

impl Transport for ThrottledTransport {
    fn send(&mut self, channel_id: u8, payload: &[u8]) -> bool {
        self.attempts += 1;
        if let Some(left) = self.remaining.as_mut() {
            if *left == 0 {
                self.rejections += 1;
                return false;
            }
            *left -= 1;
        }
        self.sent.push(SentPacket {
            channel_id,
            payload: Bytes::copy_from_slice(payload),
        });
        true
    }
}
