//! # Channel Statistics
//!
//! Read-only counters for dashboards. Nothing in here feeds back into
//! buffering decisions. All snapshots serialize to JSON.

use quanta::Instant;
use serde::Serialize;
use std::time::Duration;

// ─── Channel Stats ──────────────────────────────────────────────────────────

/// Per-channel traffic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Channel identifier.
    pub channel_id: u8,
    /// Whether the channel queues packets instead of dropping them.
    pub reliable: bool,
    /// Messages submitted through `send`.
    pub msgs_out: u64,
    /// Messages appended to a packet and held for coalescing.
    pub buffered_msgs_out: u64,
    /// Payload bytes accepted into packets.
    pub bytes_out: u64,
    /// Messages received on this channel.
    pub msgs_in: u64,
    /// Bytes received on this channel.
    pub bytes_in: u64,
    /// Buffered messages in the current one-second window.
    pub buffered_per_second: u64,
    /// Buffered messages in the last completed window.
    pub last_buffered_per_second: u64,
    /// Full packets waiting for the transport.
    pub pending_packets: usize,
    /// Messages dropped by backpressure or transport rejection.
    pub dropped_msgs: u64,
    /// Packets accepted by the transport.
    pub packets_sent: u64,
    /// Pending queue overflowed and has not yet recovered.
    pub broken: bool,
}

impl ChannelStats {
    pub fn new(channel_id: u8, reliable: bool) -> Self {
        ChannelStats {
            channel_id,
            reliable,
            ..Self::default()
        }
    }

    /// Mean bytes per transport packet.
    pub fn bytes_per_packet(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.bytes_out as f64 / self.packets_sent as f64
        }
    }

    /// Share of submitted messages that were dropped.
    pub fn drop_rate(&self) -> f64 {
        if self.msgs_out == 0 {
            0.0
        } else {
            self.dropped_msgs as f64 / self.msgs_out as f64
        }
    }
}

// ─── Pool Stats ─────────────────────────────────────────────────────────────

/// Snapshot of a [`PacketPool`](crate::pool::PacketPool).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Idle buffers held.
    pub idle: usize,
    /// Idle ceiling.
    pub max_free: usize,
    /// Packets queued on reliable channels across all connections.
    pub pending_packets: usize,
    /// Buffers allocated because the freelist was empty.
    pub allocated: u64,
    /// Buffers served from the freelist.
    pub reused: u64,
    /// Buffers dropped because the freelist was full.
    pub discarded: u64,
}

// ─── Buffered Rate ──────────────────────────────────────────────────────────

/// Tumbling-window event counter.
///
/// `record` bumps the open window; `roll` closes it once `window` has
/// elapsed, keeping its total as `last`.
#[derive(Debug, Clone)]
pub struct BufferedRate {
    window: Duration,
    started: Instant,
    current: u64,
    last: u64,
}

impl BufferedRate {
    pub fn new(window: Duration, now: Instant) -> Self {
        BufferedRate {
            window,
            started: now,
            current: 0,
            last: 0,
        }
    }

    #[inline]
    pub fn record(&mut self) {
        self.current += 1;
    }

    /// Close the window if it has run its length. Returns `true` if it rolled.
    pub fn roll(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.started) <= self.window {
            return false;
        }
        self.last = self.current;
        self.current = 0;
        self.started = now;
        true
    }

    /// Count in the open window.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Count of the last closed window.
    pub fn last(&self) -> u64 {
        self.last
    }
}
