//! # Channel Buffer
//!
//! Per-connection, per-channel outbound aggregator. Pure logic, no I/O of its
//! own: the owning connection passes its [`Transport`] into every call that
//! may emit packets, and drives [`ChannelBuffer::check_internal_buffer`] from
//! its update loop.
//!
//! ## Send path
//!
//! 1. Messages are framed and appended to the current packet.
//! 2. When the current packet cannot take the next message it is sent, or on
//!    a reliable channel queued behind earlier packets the transport refused.
//! 3. The pending queue is bounded. Once full, new messages are rejected with
//!    [`ChannelError::BufferLimit`] until the queue drains.
//! 4. Partially filled packets are flushed by the tick once they are older
//!    than `max_delay`.
//!
//! Unreliable channels never queue: a packet the transport refuses is lost.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use quanta::Instant;
use tracing::{debug, error, warn};

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::message::{MessageWriter, NetMessage};
use crate::packet::PacketBuffer;
use crate::pool::PacketPool;
use crate::stats::{BufferedRate, ChannelStats};
use crate::transport::Transport;

/// Window of the buffered-message rate counter.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Runtime-adjustable channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOption {
    /// Ceiling on queued packets of a reliable channel.
    MaxPendingBuffers,
}

// ─── ChannelBuffer ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ChannelBuffer {
    channel_id: u8,
    reliable: bool,
    max_packet_size: usize,
    max_delay: Duration,
    max_pending_packets: usize,
    current: PacketBuffer,
    /// Full packets refused by the transport, oldest first. Reliable only.
    pending: VecDeque<PacketBuffer>,
    broken: bool,
    last_flush: Instant,
    rate: BufferedRate,
    pool: Arc<PacketPool>,
    writer: MessageWriter,
    stats: ChannelStats,
}

impl ChannelBuffer {
    /// Create a channel whose packets carry at most `max_packet_size` bytes.
    pub fn new(
        config: &ChannelConfig,
        max_packet_size: usize,
        pool: Arc<PacketPool>,
        now: Instant,
    ) -> Self {
        let current = pool.acquire(max_packet_size, config.reliable);
        ChannelBuffer {
            channel_id: config.channel_id,
            reliable: config.reliable,
            max_packet_size,
            max_delay: config.max_delay,
            max_pending_packets: config.max_pending_packets,
            current,
            pending: VecDeque::new(),
            broken: false,
            last_flush: now,
            rate: BufferedRate::new(RATE_WINDOW, now),
            pool,
            writer: MessageWriter::with_capacity(max_packet_size),
            stats: ChannelStats::new(config.channel_id, config.reliable),
        }
    }

    // ─── Send ────────────────────────────────────────────────────────────

    /// Frame `message` as `msg_type` and append it to the channel.
    pub fn send<M: NetMessage + ?Sized>(
        &mut self,
        transport: &mut dyn Transport,
        msg_type: u16,
        message: &M,
    ) -> Result<(), ChannelError> {
        let mut writer = std::mem::take(&mut self.writer);
        let result = match writer.frame(msg_type, message) {
            Ok(framed) => {
                self.stats.msgs_out += 1;
                self.send_bytes(transport, framed)
            }
            Err(e) => {
                error!(channel_id = self.channel_id, msg_type, error = %e, "failed to frame message");
                Err(e)
            }
        };
        self.writer = writer;
        result
    }

    /// Send a message already framed in `writer`.
    pub fn send_writer(
        &mut self,
        transport: &mut dyn Transport,
        writer: &MessageWriter,
    ) -> Result<(), ChannelError> {
        self.send_bytes(transport, writer.as_bytes())
    }

    /// Append raw bytes to the channel.
    pub fn send_bytes(
        &mut self,
        transport: &mut dyn Transport,
        bytes: &[u8],
    ) -> Result<(), ChannelError> {
        let len = bytes.len();
        if len == 0 {
            error!(channel_id = self.channel_id, "cannot send zero-length payload");
            return Err(ChannelError::EmptyPayload);
        }
        // No fragmentation: anything above one packet is a caller bug.
        if len > self.max_packet_size {
            error!(
                channel_id = self.channel_id,
                len,
                max = self.max_packet_size,
                "message exceeds channel maximum packet size"
            );
            return Err(ChannelError::MessageTooLarge {
                len,
                max: self.max_packet_size,
            });
        }

        if self.current.has_space(len) {
            self.current.write(bytes);
            self.stats.bytes_out += len as u64;
            if !self.max_delay.is_zero() {
                self.mark_buffered();
                return Ok(());
            }
            if !self.send_internal_buffer(transport) && !self.reliable {
                debug!(channel_id = self.channel_id, "unreliable packet refused by transport");
                return Err(ChannelError::TransportBusy {
                    channel_id: self.channel_id,
                });
            }
            return Ok(());
        }

        if self.reliable {
            if self.pending.is_empty() {
                if !self.send_current(transport) {
                    self.queue_current();
                }
                self.write_buffered(bytes);
                return Ok(());
            }

            if self.pending.len() >= self.max_pending_packets {
                if !self.broken {
                    error!(
                        channel_id = self.channel_id,
                        pending = self.pending.len(),
                        "pending packet limit reached, dropping messages"
                    );
                }
                self.broken = true;
                self.stats.dropped_msgs += 1;
                return Err(ChannelError::BufferLimit {
                    channel_id: self.channel_id,
                    limit: self.max_pending_packets,
                });
            }

            // Sending here would overtake the queued packets.
            self.queue_current();
            self.write_buffered(bytes);
            return Ok(());
        }

        if !self.send_current(transport) {
            self.stats.dropped_msgs += 1;
            debug!(channel_id = self.channel_id, "no room on unreliable channel");
            return Err(ChannelError::TransportBusy {
                channel_id: self.channel_id,
            });
        }
        self.write_buffered(bytes);
        Ok(())
    }

    // ─── Flush / Tick ────────────────────────────────────────────────────

    /// Push buffered data to the transport.
    ///
    /// With packets queued, drains them in order until the transport refuses
    /// one and returns `true`. Otherwise sends the current packet and returns
    /// whether the transport took it.
    pub fn send_internal_buffer(&mut self, transport: &mut dyn Transport) -> bool {
        if !self.reliable || self.pending.is_empty() {
            return self.send_current(transport);
        }

        while let Some(mut packet) = self.pending.pop_front() {
            if !packet.send_to_transport(transport, self.channel_id) {
                self.pending.push_front(packet);
                break;
            }
            self.stats.packets_sent += 1;
            self.pool.track_dequeue(1);
            self.pool.release(packet);

            if self.broken
                && (self.pending.len() < self.max_pending_packets / 2 || self.pending.is_empty())
            {
                warn!(
                    channel_id = self.channel_id,
                    pending = self.pending.len(),
                    "recovered from overflow, data was lost"
                );
                self.broken = false;
            }
        }
        true
    }

    /// Periodic update, called once per scheduling interval.
    ///
    /// Flushes once the current packet (or the queue) has waited longer than
    /// `max_delay`, and rolls the buffered-per-second window.
    pub fn check_internal_buffer(&mut self, transport: &mut dyn Transport, now: Instant) {
        let has_data = !self.current.is_empty() || !self.pending.is_empty();
        if has_data && now.saturating_duration_since(self.last_flush) > self.max_delay {
            self.send_internal_buffer(transport);
            self.last_flush = now;
        }
        self.rate.roll(now);
    }

    // ─── Options ─────────────────────────────────────────────────────────

    pub fn set_option(&mut self, option: ChannelOption, value: i64) -> Result<(), ChannelError> {
        match option {
            ChannelOption::MaxPendingBuffers => {
                if !self.reliable {
                    error!(
                        channel_id = self.channel_id,
                        "cannot set max pending buffers on unreliable channel"
                    );
                    return Err(ChannelError::OptionUnsupported {
                        channel_id: self.channel_id,
                    });
                }
                let max = self.pool.max_free();
                match usize::try_from(value) {
                    Ok(n) if n < max => {
                        self.max_pending_packets = n;
                        Ok(())
                    }
                    _ => {
                        error!(
                            channel_id = self.channel_id,
                            value, max, "invalid max pending buffers"
                        );
                        Err(ChannelError::InvalidOption {
                            channel_id: self.channel_id,
                            value,
                            max,
                        })
                    }
                }
            }
        }
    }

    pub fn set_max_delay(&mut self, max_delay: Duration) {
        self.max_delay = max_delay;
    }

    // ─── Inbound / Teardown ──────────────────────────────────────────────

    /// Account for `msgs` messages totalling `bytes` received on this channel.
    pub fn record_received(&mut self, msgs: u64, bytes: u64) {
        self.stats.msgs_in += msgs;
        self.stats.bytes_in += bytes;
    }

    /// Discard every queued packet, returning the buffers to the pool.
    /// The channel stays usable.
    pub fn close(&mut self) {
        let n = self.pending.len();
        if n == 0 {
            return;
        }
        self.pool.track_dequeue(n);
        for packet in self.pending.drain(..) {
            self.pool.release(packet);
        }
        self.broken = false;
        debug!(channel_id = self.channel_id, discarded = n, "pending packets released");
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Pending queue overflowed and has not drained yet.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn max_pending_packets(&self) -> usize {
        self.max_pending_packets
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// The packet currently accepting writes.
    pub fn current_packet(&self) -> &PacketBuffer {
        &self.current
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            buffered_per_second: self.rate.current(),
            last_buffered_per_second: self.rate.last(),
            pending_packets: self.pending.len(),
            broken: self.broken,
            ..self.stats.clone()
        }
    }

    // ─── Internal Helpers ────────────────────────────────────────────────

    /// Send the current packet, keeping the counters straight.
    fn send_current(&mut self, transport: &mut dyn Transport) -> bool {
        if self.current.is_empty() {
            return true;
        }
        let messages = self.current.messages() as u64;
        if self.current.send_to_transport(transport, self.channel_id) {
            self.stats.packets_sent += 1;
            return true;
        }
        if !self.reliable {
            self.stats.dropped_msgs += messages;
        }
        false
    }

    /// Move the current packet to the back of the queue and start a fresh one.
    fn queue_current(&mut self) {
        let fresh = self.pool.acquire(self.max_packet_size, self.reliable);
        let full = std::mem::replace(&mut self.current, fresh);
        self.pending.push_back(full);
        self.pool.track_enqueue();
    }

    fn write_buffered(&mut self, bytes: &[u8]) {
        self.current.write(bytes);
        self.stats.bytes_out += bytes.len() as u64;
        self.mark_buffered();
    }

    fn mark_buffered(&mut self) {
        self.stats.buffered_msgs_out += 1;
        self.rate.record();
    }
}

impl Drop for ChannelBuffer {
    fn drop(&mut self) {
        self.close();
        let current = std::mem::replace(&mut self.current, PacketBuffer::new(0, self.reliable));
        self.pool.release(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ThrottledTransport;
    use quanta::{Clock, Mock};

    const MAX: usize = 10;

    struct Harness {
        channel: ChannelBuffer,
        pool: Arc<PacketPool>,
        clock: Clock,
        mock: Arc<Mock>,
    }

    fn harness(config: ChannelConfig) -> Harness {
        let (clock, mock) = Clock::mock();
        let pool = Arc::new(PacketPool::new(32));
        let channel = ChannelBuffer::new(&config, MAX, Arc::clone(&pool), clock.now());
        Harness {
            channel,
            pool,
            clock,
            mock,
        }
    }

    fn reliable() -> ChannelConfig {
        ChannelConfig::reliable(0).with_max_delay(Duration::from_secs(1))
    }

    fn unreliable() -> ChannelConfig {
        ChannelConfig::unreliable(1).with_max_delay(Duration::from_secs(1))
    }

    /// Fill a reliable channel until its queue holds `max_pending` packets.
    /// Message `i` is `[i; MAX]`, so each packet carries exactly one message.
    fn saturate(h: &mut Harness, t: &mut ThrottledTransport, max_pending: usize) {
        for i in 0..=max_pending as u8 {
            h.channel.send_bytes(t, &[i; MAX]).unwrap();
        }
        assert_eq!(h.channel.pending_len(), max_pending);
    }

    // ─── Argument Checks ────────────────────────────────────────────────

    #[test]
    fn write_into_empty_packet_grows_by_n() {
        for n in 1..=MAX {
            let mut h = harness(reliable());
            let mut t = ThrottledTransport::unlimited();
            h.channel.send_bytes(&mut t, &vec![7; n]).unwrap();
            assert_eq!(h.channel.current_packet().len(), n);
            assert_eq!(t.attempts(), 0);
        }
    }

    #[test]
    fn zero_length_rejected() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        h.channel.send_bytes(&mut t, b"abc").unwrap();
        assert_eq!(
            h.channel.send_bytes(&mut t, &[]),
            Err(ChannelError::EmptyPayload)
        );
        assert_eq!(h.channel.current_packet().len(), 3);
    }

    #[test]
    fn oversized_rejected_without_mutation() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        h.channel.send_bytes(&mut t, b"abc").unwrap();
        assert_eq!(
            h.channel.send_bytes(&mut t, &[0; MAX + 1]),
            Err(ChannelError::MessageTooLarge { len: MAX + 1, max: MAX })
        );
        assert_eq!(h.channel.current_packet().as_bytes(), b"abc");
        assert_eq!(h.channel.pending_len(), 0);
        assert_eq!(t.attempts(), 0);
    }

    // ─── Reliable Overflow ──────────────────────────────────────────────

    #[test]
    fn overflow_with_empty_queue_sends_once() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        h.channel.send_bytes(&mut t, &[1; 6]).unwrap();
        h.channel.send_bytes(&mut t, &[2; 6]).unwrap();

        assert_eq!(t.attempts(), 1);
        assert_eq!(t.sent()[0].payload, &[1u8; 6][..]);
        assert_eq!(h.channel.current_packet().as_bytes(), &[2; 6]);
        assert_eq!(h.channel.pending_len(), 0);
        assert_eq!(h.channel.stats().packets_sent, 1);
    }

    #[test]
    fn overflow_refused_by_transport_is_queued() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::with_budget(0);
        h.channel.send_bytes(&mut t, &[1; 6]).unwrap();
        h.channel.send_bytes(&mut t, &[2; 6]).unwrap();

        assert_eq!(h.channel.pending_len(), 1);
        assert_eq!(h.pool.pending_packets(), 1);
        assert_eq!(h.channel.current_packet().as_bytes(), &[2; 6]);
    }

    #[test]
    fn queued_channel_never_sends_directly() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::with_budget(0);
        h.channel.send_bytes(&mut t, &[1; 6]).unwrap();
        h.channel.send_bytes(&mut t, &[2; 6]).unwrap();
        t.set_budget(None);

        // Queue is non-empty, so the full packet is queued, not sent.
        h.channel.send_bytes(&mut t, &[3; 6]).unwrap();
        assert_eq!(t.sent().len(), 0);
        assert_eq!(h.channel.pending_len(), 2);
    }

    #[test]
    fn queue_at_limit_rejects_and_breaks() {
        let mut h = harness(reliable().with_max_pending_packets(2));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 2);
        let current = h.channel.current_packet().as_bytes().to_vec();

        assert_eq!(
            h.channel.send_bytes(&mut t, &[9; MAX]),
            Err(ChannelError::BufferLimit { channel_id: 0, limit: 2 })
        );
        assert_eq!(h.channel.pending_len(), 2);
        assert!(h.channel.is_broken());
        assert_eq!(h.channel.current_packet().as_bytes(), current.as_slice());
        assert_eq!(h.channel.stats().dropped_msgs, 1);

        // Still broken on repeated overflow, still dropping.
        assert!(h.channel.send_bytes(&mut t, &[9; MAX]).is_err());
        assert_eq!(h.channel.stats().dropped_msgs, 2);
    }

    #[test]
    fn recovers_once_below_half() {
        let mut h = harness(reliable().with_max_pending_packets(4));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 4);
        assert!(h.channel.send_bytes(&mut t, &[9; MAX]).is_err());
        assert!(h.channel.is_broken());

        // 4 → 3: not below 2.
        t.set_budget(Some(1));
        assert!(h.channel.send_internal_buffer(&mut t));
        assert_eq!(h.channel.pending_len(), 3);
        assert!(h.channel.is_broken());

        // 3 → 1: below 2, recovered; the 4th packet is refused and stays.
        t.set_budget(Some(2));
        h.channel.send_internal_buffer(&mut t);
        assert_eq!(h.channel.pending_len(), 1);
        assert!(!h.channel.is_broken());
        assert_eq!(h.pool.pending_packets(), 1);
    }

    #[test]
    fn limit_of_one_recovers_when_queue_empties() {
        let mut h = harness(reliable().with_max_pending_packets(1));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 1);
        assert!(h.channel.send_bytes(&mut t, &[9; MAX]).is_err());
        assert!(h.channel.is_broken());

        t.set_budget(None);
        h.channel.send_internal_buffer(&mut t);
        assert_eq!(h.channel.pending_len(), 0);
        assert!(!h.channel.is_broken());
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let mut h = harness(reliable().with_max_pending_packets(4));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 4);

        t.set_budget(Some(2));
        h.channel.send_internal_buffer(&mut t);
        t.set_budget(None);
        h.channel.send_internal_buffer(&mut t);
        h.channel.send_internal_buffer(&mut t);

        let order: Vec<u8> = t.sent().iter().map(|p| p.payload[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(h.channel.pending_len(), 0);
        assert!(h.channel.current_packet().is_empty());
    }

    #[test]
    fn drained_packets_return_to_pool() {
        let mut h = harness(reliable().with_max_pending_packets(4));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 3);
        assert_eq!(h.pool.idle(), 0);

        t.set_budget(None);
        h.channel.send_internal_buffer(&mut t);
        assert_eq!(h.pool.idle(), 3);
        assert_eq!(h.pool.pending_packets(), 0);
    }

    // ─── Flush ──────────────────────────────────────────────────────────

    #[test]
    fn flush_on_empty_channel_is_idempotent() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        assert!(h.channel.send_internal_buffer(&mut t));
        assert!(h.channel.send_internal_buffer(&mut t));
        assert_eq!(t.attempts(), 0);

        h.channel.send_bytes(&mut t, b"x").unwrap();
        assert!(h.channel.send_internal_buffer(&mut t));
        assert!(h.channel.send_internal_buffer(&mut t));
        assert_eq!(t.attempts(), 1);
    }

    #[test]
    fn zero_delay_sends_immediately() {
        let mut h = harness(reliable().with_max_delay(Duration::ZERO));
        let mut t = ThrottledTransport::unlimited();
        h.channel.send_bytes(&mut t, b"now").unwrap();
        assert_eq!(t.sent().len(), 1);
        assert!(h.channel.current_packet().is_empty());
        assert_eq!(h.channel.stats().buffered_msgs_out, 0);
    }

    #[test]
    fn zero_delay_reliable_keeps_refused_data() {
        let mut h = harness(reliable().with_max_delay(Duration::ZERO));
        let mut t = ThrottledTransport::with_budget(0);
        h.channel.send_bytes(&mut t, b"later").unwrap();
        assert_eq!(h.channel.current_packet().as_bytes(), b"later");
    }

    #[test]
    fn zero_delay_unreliable_reports_loss() {
        let mut h = harness(unreliable().with_max_delay(Duration::ZERO));
        let mut t = ThrottledTransport::with_budget(0);
        assert_eq!(
            h.channel.send_bytes(&mut t, b"gone"),
            Err(ChannelError::TransportBusy { channel_id: 1 })
        );
        assert!(h.channel.current_packet().is_empty());
        assert_eq!(h.channel.stats().dropped_msgs, 1);
    }

    #[test]
    fn tick_flushes_after_max_delay() {
        let mut h = harness(reliable().with_max_delay(Duration::from_millis(10)));
        let mut t = ThrottledTransport::unlimited();
        h.channel.send_bytes(&mut t, b"a").unwrap();
        h.channel.send_bytes(&mut t, b"b").unwrap();

        h.mock.increment(Duration::from_millis(5));
        h.channel.check_internal_buffer(&mut t, h.clock.now());
        assert_eq!(t.sent().len(), 0);

        h.mock.increment(Duration::from_millis(6));
        h.channel.check_internal_buffer(&mut t, h.clock.now());
        assert_eq!(t.sent().len(), 1);
        assert_eq!(t.sent()[0].payload, &b"ab"[..]);

        // Timer was reset by the flush.
        h.channel.send_bytes(&mut t, b"c").unwrap();
        h.mock.increment(Duration::from_millis(5));
        h.channel.check_internal_buffer(&mut t, h.clock.now());
        assert_eq!(t.sent().len(), 1);
    }

    #[test]
    fn tick_drains_queue() {
        let mut h = harness(reliable().with_max_pending_packets(4));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 2);

        t.set_budget(None);
        h.mock.increment(Duration::from_millis(1001));
        h.channel.check_internal_buffer(&mut t, h.clock.now());
        assert_eq!(h.channel.pending_len(), 0);
        assert_eq!(t.sent().len(), 2);
    }

    #[test]
    fn tick_rolls_buffered_rate() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        h.channel.send_bytes(&mut t, b"a").unwrap();
        h.channel.send_bytes(&mut t, b"b").unwrap();
        assert_eq!(h.channel.stats().buffered_per_second, 2);

        h.mock.increment(Duration::from_millis(1100));
        h.channel.check_internal_buffer(&mut t, h.clock.now());
        let stats = h.channel.stats();
        assert_eq!(stats.buffered_per_second, 0);
        assert_eq!(stats.last_buffered_per_second, 2);
        assert_eq!(stats.buffered_msgs_out, 2);
    }

    // ─── Unreliable ─────────────────────────────────────────────────────

    #[test]
    fn unreliable_overflow_sends_and_continues() {
        let mut h = harness(unreliable());
        let mut t = ThrottledTransport::unlimited();
        h.channel.send_bytes(&mut t, &[1; 6]).unwrap();
        h.channel.send_bytes(&mut t, &[2; 6]).unwrap();
        assert_eq!(t.sent().len(), 1);
        assert_eq!(h.channel.current_packet().as_bytes(), &[2; 6]);
    }

    #[test]
    fn unreliable_refusal_drops_packet_and_message() {
        let mut h = harness(unreliable());
        let mut t = ThrottledTransport::with_budget(0);
        h.channel.send_bytes(&mut t, &[1; 4]).unwrap();
        h.channel.send_bytes(&mut t, &[2; 4]).unwrap();
        assert_eq!(
            h.channel.send_bytes(&mut t, &[3; 4]),
            Err(ChannelError::TransportBusy { channel_id: 1 })
        );
        assert_eq!(h.channel.pending_len(), 0);
        assert!(h.channel.current_packet().is_empty());
        // Two messages in the lost packet plus the refused one.
        assert_eq!(h.channel.stats().dropped_msgs, 3);
    }

    // ─── Options ────────────────────────────────────────────────────────

    #[test]
    fn set_max_pending_on_reliable() {
        let mut h = harness(reliable());
        h.channel
            .set_option(ChannelOption::MaxPendingBuffers, 3)
            .unwrap();
        assert_eq!(h.channel.max_pending_packets(), 3);
        h.channel
            .set_option(ChannelOption::MaxPendingBuffers, 0)
            .unwrap();
        assert_eq!(h.channel.max_pending_packets(), 0);
    }

    #[test]
    fn set_max_pending_out_of_range() {
        let mut h = harness(reliable());
        for value in [-1, 32, 1000] {
            assert!(matches!(
                h.channel.set_option(ChannelOption::MaxPendingBuffers, value),
                Err(ChannelError::InvalidOption { max: 32, .. })
            ));
        }
        assert_eq!(h.channel.max_pending_packets(), 16);
    }

    #[test]
    fn set_max_pending_on_unreliable_rejected() {
        let mut h = harness(unreliable());
        assert_eq!(
            h.channel.set_option(ChannelOption::MaxPendingBuffers, 4),
            Err(ChannelError::OptionUnsupported { channel_id: 1 })
        );
    }

    // ─── Framing / Counters ─────────────────────────────────────────────

    #[test]
    fn send_frames_and_counts() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        h.channel.send(&mut t, 5, "hi").unwrap();
        assert_eq!(h.channel.current_packet().as_bytes(), &[2, 0, 5, 0, b'h', b'i']);
        let stats = h.channel.stats();
        assert_eq!(stats.msgs_out, 1);
        assert_eq!(stats.bytes_out, 6);
    }

    #[test]
    fn send_rejects_frame_larger_than_packet() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        // 4-byte envelope + 7 bytes = 11 > MAX.
        assert!(matches!(
            h.channel.send(&mut t, 1, "1234567"),
            Err(ChannelError::MessageTooLarge { len: 11, .. })
        ));
    }

    struct Unserializable;

    impl NetMessage for Unserializable {
        fn serialize(&self, writer: &mut MessageWriter) -> Result<(), ChannelError> {
            writer.put_u32(0xDEAD_BEEF);
            Err(ChannelError::Serialize("no encoding".into()))
        }
    }

    #[test]
    fn serialize_failure_leaves_channel_usable() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        h.channel.send(&mut t, 5, "a").unwrap();

        assert_eq!(
            h.channel.send(&mut t, 6, &Unserializable),
            Err(ChannelError::Serialize("no encoding".into()))
        );
        let stats = h.channel.stats();
        assert_eq!(stats.msgs_out, 1);
        assert_eq!(stats.bytes_out, 5);
        assert_eq!(h.channel.current_packet().as_bytes(), &[1, 0, 5, 0, b'a']);

        // Scratch writer survives the failure.
        h.channel.send(&mut t, 7, "b").unwrap();
        assert_eq!(
            h.channel.current_packet().as_bytes(),
            &[1, 0, 5, 0, b'a', 1, 0, 7, 0, b'b']
        );
        assert_eq!(h.channel.stats().msgs_out, 2);
        assert_eq!(t.attempts(), 0);
    }

    #[test]
    fn send_rejects_body_beyond_envelope() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        let big = vec![0u8; u16::MAX as usize + 1];
        assert_eq!(
            h.channel.send(&mut t, 1, &big),
            Err(ChannelError::MessageBodyTooLarge(u16::MAX as usize + 1))
        );
        assert!(h.channel.current_packet().is_empty());
        assert_eq!(h.channel.stats().msgs_out, 0);

        h.channel.send(&mut t, 2, "ok").unwrap();
        assert_eq!(h.channel.current_packet().as_bytes(), &[2, 0, 2, 0, b'o', b'k']);
    }

    #[test]
    fn send_writer_uses_prebuilt_frame() {
        let mut h = harness(reliable());
        let mut t = ThrottledTransport::unlimited();
        let mut w = MessageWriter::new();
        w.frame(2, "ok").unwrap();
        h.channel.send_writer(&mut t, &w).unwrap();
        assert_eq!(h.channel.current_packet().len(), 6);
    }

    #[test]
    fn inbound_counters() {
        let mut h = harness(unreliable());
        h.channel.record_received(3, 120);
        let stats = h.channel.stats();
        assert_eq!(stats.msgs_in, 3);
        assert_eq!(stats.bytes_in, 120);
    }

    // ─── Teardown ───────────────────────────────────────────────────────

    #[test]
    fn close_releases_pending() {
        let mut h = harness(reliable().with_max_pending_packets(4));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 3);
        h.channel.close();
        assert_eq!(h.channel.pending_len(), 0);
        assert_eq!(h.pool.idle(), 3);
        assert_eq!(h.pool.pending_packets(), 0);
    }

    #[test]
    fn drop_returns_all_buffers() {
        let mut h = harness(reliable().with_max_pending_packets(4));
        let mut t = ThrottledTransport::with_budget(0);
        saturate(&mut h, &mut t, 2);
        let pool = Arc::clone(&h.pool);
        drop(h);
        assert_eq!(pool.idle(), 3);
        assert_eq!(pool.pending_packets(), 0);
    }
}
