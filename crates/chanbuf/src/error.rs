//! Error types for channel buffering.

use thiserror::Error;

// ── Channel Errors ──────────────────────────────────────────────────

/// Why a send or control operation on a channel was refused.
///
/// None of these are fatal. Caller misuse and configuration rejections leave
/// channel state untouched; `BufferLimit` and `TransportBusy` mean the
/// message was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("cannot send a zero-length payload")]
    EmptyPayload,
    #[error("message of {len} bytes exceeds the channel maximum of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },
    #[error("pending packet limit of {limit} reached on channel {channel_id}")]
    BufferLimit { channel_id: u8, limit: usize },
    #[error("transport has no room on unreliable channel {channel_id}")]
    TransportBusy { channel_id: u8 },
    #[error("option is not supported on unreliable channel {channel_id}")]
    OptionUnsupported { channel_id: u8 },
    #[error("invalid value {value} for channel {channel_id}, must be in 0..{max}")]
    InvalidOption { channel_id: u8, value: i64, max: usize },
    #[error("unknown channel {0}")]
    UnknownChannel(u8),
    #[error("message body of {0} bytes does not fit the frame length field")]
    MessageBodyTooLarge(usize),
    #[error("malformed frame at offset {offset}")]
    MalformedFrame { offset: usize },
    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl ChannelError {
    /// Whether the error means an outbound message was dropped under load,
    /// as opposed to being refused for caller misuse.
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            ChannelError::BufferLimit { .. } | ChannelError::TransportBusy { .. }
        )
    }
}

// ── Config Errors ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("packet size {packet_size} must exceed the header reserve of {reserve} bytes")]
    PacketTooSmall { packet_size: usize, reserve: usize },
    #[error("channel at index {0} has no id and cannot be numbered implicitly")]
    TooManyChannels(usize),

    #[error("duplicate channel id {0}")]
    DuplicateChannel(u8),
    #[error("max_pending_packets {value} on channel {channel_id} must be below {max}")]
    PendingOutOfRange {
        channel_id: u8,
        value: usize,
        max: usize,
    },
    #[error("pool ceiling must be greater than zero")]
    EmptyPool,
}
