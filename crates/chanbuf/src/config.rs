use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::packet::PACKET_HEADER_RESERVE;
use crate::pool::MAX_FREE_PACKETS;

pub const CONFIG_VERSION: u32 = 1;

/// Default transport packet size (Ethernet MTU).
pub const DEFAULT_PACKET_SIZE: usize = 1500;

/// Default coalescing window.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10);

/// Default ceiling on queued packets per reliable channel.
pub const DEFAULT_MAX_PENDING_PACKETS: usize = 16;

// ─── TOML input ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionConfigInput {
    pub version: u32,
    pub packet_size: Option<usize>,
    pub pool_max_free: Option<usize>,
    pub channels: Vec<ChannelConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelConfigInput {
    pub id: Option<u8>,
    pub reliable: Option<bool>,
    pub max_delay_ms: Option<u64>,
    pub max_pending_packets: Option<usize>,
}

// ─── Resolved config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel_id: u8,
    pub reliable: bool,
    /// Longest a partially filled packet may wait. Zero sends every message
    /// as soon as it is written.
    pub max_delay: Duration,
    /// Ignored on unreliable channels.
    pub max_pending_packets: usize,
}

impl ChannelConfig {
    pub fn reliable(channel_id: u8) -> Self {
        ChannelConfig {
            channel_id,
            reliable: true,
            max_delay: DEFAULT_MAX_DELAY,
            max_pending_packets: DEFAULT_MAX_PENDING_PACKETS,
        }
    }

    pub fn unreliable(channel_id: u8) -> Self {
        ChannelConfig {
            reliable: false,
            ..Self::reliable(channel_id)
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_pending_packets(mut self, n: usize) -> Self {
        self.max_pending_packets = n;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub version: u32,
    /// Transport packet size; the usable channel payload is this minus
    /// [`PACKET_HEADER_RESERVE`].
    pub packet_size: usize,
    pub pool_max_free: usize,
    pub channels: Vec<ChannelConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            packet_size: DEFAULT_PACKET_SIZE,
            pool_max_free: MAX_FREE_PACKETS,
            channels: vec![ChannelConfig::reliable(0), ChannelConfig::unreliable(1)],
        }
    }
}

impl ConnectionConfig {
    /// Largest message a channel of this connection accepts.
    pub fn max_packet_size(&self) -> usize {
        self.packet_size.saturating_sub(PACKET_HEADER_RESERVE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_size <= PACKET_HEADER_RESERVE {
            return Err(ConfigError::PacketTooSmall {
                packet_size: self.packet_size,
                reserve: PACKET_HEADER_RESERVE,
            });
        }
        if self.pool_max_free == 0 {
            return Err(ConfigError::EmptyPool);
        }
        let mut seen = HashSet::new();
        for ch in &self.channels {
            if !seen.insert(ch.channel_id) {
                return Err(ConfigError::DuplicateChannel(ch.channel_id));
            }
            if ch.reliable && ch.max_pending_packets >= self.pool_max_free {
                return Err(ConfigError::PendingOutOfRange {
                    channel_id: ch.channel_id,
                    value: ch.max_pending_packets,
                    max: self.pool_max_free,
                });
            }
        }
        Ok(())
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(ConnectionConfig::default());
        }
        let parsed: ConnectionConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}

impl ConnectionConfigInput {
    pub fn resolve(self) -> Result<ConnectionConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = ConnectionConfig::default();
        let channels = if self.channels.is_empty() {
            defaults.channels
        } else {
            self.channels
                .into_iter()
                .enumerate()
                .map(|(idx, ch)| {
                    let channel_id = match ch.id {
                        Some(id) => id,
                        None => u8::try_from(idx)
                            .map_err(|_| ConfigError::TooManyChannels(idx))?,
                    };
                    Ok(ChannelConfig {
                        channel_id,
                        reliable: ch.reliable.unwrap_or(true),
                        max_delay: ch
                            .max_delay_ms
                            .map(Duration::from_millis)
                            .unwrap_or(DEFAULT_MAX_DELAY),
                        max_pending_packets: ch
                            .max_pending_packets
                            .unwrap_or(DEFAULT_MAX_PENDING_PACKETS),
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?
        };

        let config = ConnectionConfig {
            version,
            packet_size: self.packet_size.unwrap_or(defaults.packet_size),
            pool_max_free: self.pool_max_free.unwrap_or(defaults.pool_max_free),
            channels,
        };
        config.validate()?;
        Ok(config)
    }
}
