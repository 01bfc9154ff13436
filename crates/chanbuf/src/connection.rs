//! # Connection
//!
//! Owns one transport endpoint and the channel buffers multiplexed over it.
//! All channel operations run serially from the connection's own update
//! cycle; the only state shared with other connections is the packet pool.

use std::sync::Arc;

use bytes::Bytes;
use quanta::Clock;
use tracing::{debug, error, warn};

use crate::channel::{ChannelBuffer, ChannelOption};
use crate::config::ConnectionConfig;
use crate::error::{ChannelError, ConfigError};
use crate::message::{Frame, MessageReader, NetMessage};
use crate::pool::PacketPool;
use crate::stats::ChannelStats;
use crate::transport::Transport;

pub struct Connection<T: Transport> {
    transport: T,
    channels: Vec<ChannelBuffer>,
    pool: Arc<PacketPool>,
    clock: Clock,
    max_packet_size: usize,
}

impl<T: Transport> Connection<T> {
    /// Build a connection with its own packet pool.
    pub fn new(transport: T, config: &ConnectionConfig) -> Result<Self, ConfigError> {
        let pool = Arc::new(PacketPool::new(config.pool_max_free));
        Self::with_pool(transport, config, pool)
    }

    /// Build a connection sharing `pool` with other connections.
    pub fn with_pool(
        transport: T,
        config: &ConnectionConfig,
        pool: Arc<PacketPool>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(transport, config, pool, Clock::new())
    }

    /// Build a connection reading time from `clock` (mockable in tests).
    pub fn with_clock(
        transport: T,
        config: &ConnectionConfig,
        pool: Arc<PacketPool>,
        clock: Clock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        // The pool may be shared and smaller than the config's own ceiling.
        let max_free = pool.max_free();
        if let Some(ch) = config
            .channels
            .iter()
            .find(|ch| ch.reliable && ch.max_pending_packets >= max_free)
        {
            error!(
                channel_id = ch.channel_id,
                max_pending = ch.max_pending_packets,
                max_free,
                "pending limit exceeds shared pool ceiling"
            );
            return Err(ConfigError::PendingOutOfRange {
                channel_id: ch.channel_id,
                value: ch.max_pending_packets,
                max: max_free,
            });
        }
        let max_packet_size = config.max_packet_size();
        let now = clock.now();
        let channels = config
            .channels
            .iter()
            .map(|ch| ChannelBuffer::new(ch, max_packet_size, Arc::clone(&pool), now))
            .collect();
        debug!(
            channels = config.channels.len(),
            max_packet_size, "connection created"
        );
        Ok(Connection {
            transport,
            channels,
            pool,
            clock,
            max_packet_size,
        })
    }

    // ─── Send ────────────────────────────────────────────────────────────

    /// Frame and send `message` on `channel_id`.
    pub fn send<M: NetMessage + ?Sized>(
        &mut self,
        channel_id: u8,
        msg_type: u16,
        message: &M,
    ) -> Result<(), ChannelError> {
        let channel = find_mut(&mut self.channels, channel_id)?;
        channel.send(&mut self.transport, msg_type, message)
    }

    /// Send pre-framed bytes on `channel_id`.
    pub fn send_bytes(&mut self, channel_id: u8, bytes: &[u8]) -> Result<(), ChannelError> {
        let channel = find_mut(&mut self.channels, channel_id)?;
        channel.send_bytes(&mut self.transport, bytes)
    }

    // ─── Update ──────────────────────────────────────────────────────────

    /// Tick every channel: flush stale packets and drain queues.
    pub fn update(&mut self) {
        let now = self.clock.now();
        for channel in &mut self.channels {
            channel.check_internal_buffer(&mut self.transport, now);
        }
    }

    /// Push everything buffered to the transport right away.
    pub fn flush_channels(&mut self) {
        for channel in &mut self.channels {
            channel.send_internal_buffer(&mut self.transport);
        }
    }

    pub fn set_channel_option(
        &mut self,
        channel_id: u8,
        option: ChannelOption,
        value: i64,
    ) -> Result<(), ChannelError> {
        find_mut(&mut self.channels, channel_id)?.set_option(option, value)
    }

    // ─── Inbound ─────────────────────────────────────────────────────────

    /// Split a received packet into messages and count them on `channel_id`.
    pub fn handle_packet(
        &mut self,
        channel_id: u8,
        packet: Bytes,
    ) -> Result<Vec<Frame>, ChannelError> {
        let channel = find_mut(&mut self.channels, channel_id)?;
        let len = packet.len() as u64;
        let frames = MessageReader::new(packet)
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|e| warn!(channel_id, error = %e, "dropping malformed packet"))?;
        channel.record_received(frames.len() as u64, len);
        Ok(frames)
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Release every queued packet back to the pool.
    pub fn close(&mut self) {
        let pending: usize = self.channels.iter().map(|c| c.pending_len()).sum();
        for channel in &mut self.channels {
            channel.close();
        }
        debug!(discarded = pending, "connection closed");
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn channel(&self, channel_id: u8) -> Option<&ChannelBuffer> {
        self.channels.iter().find(|c| c.channel_id() == channel_id)
    }

    pub fn channel_mut(&mut self, channel_id: u8) -> Option<&mut ChannelBuffer> {
        self.channels.iter_mut().find(|c| c.channel_id() == channel_id)
    }

    pub fn channel_stats(&self, channel_id: u8) -> Option<ChannelStats> {
        self.channel(channel_id).map(ChannelBuffer::stats)
    }

    /// Stats of every channel, in configuration order.
    pub fn all_stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(ChannelBuffer::stats).collect()
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.channels.iter().map(ChannelBuffer::channel_id)
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

fn find_mut(channels: &mut [ChannelBuffer], channel_id: u8) -> Result<&mut ChannelBuffer, ChannelError> {
    match channels.iter_mut().find(|c| c.channel_id() == channel_id) {
        Some(channel) => Ok(channel),
        None => {
            error!(channel_id, "unknown channel");
            Err(ChannelError::UnknownChannel(channel_id))
        }
    }
}
