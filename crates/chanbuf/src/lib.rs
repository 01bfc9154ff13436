//! # chanbuf
//!
//! Outbound channel buffering for a networked application's transport layer.
//!
//! Application messages are coalesced into transport-sized packets, each
//! channel applies its own reliability rule (queue in order, or drop), queues
//! are bounded to apply backpressure when a connection cannot drain, and
//! packet buffers are recycled through a shared pool.
//!
//! ## Crate structure
//!
//! - [`packet`] — Fixed-capacity outbound packet buffer
//! - [`pool`] — Bounded freelist of packet buffers, shared across connections
//! - [`channel`] — Per-channel aggregator: coalescing, queueing, backpressure
//! - [`connection`] — Owns a transport and its channels, drives the tick
//! - [`message`] — Message envelope, scratch writer, frame reader
//! - [`transport`] — Transport trait and an in-memory throttled transport
//! - [`stats`] — Channel and pool counters
//! - [`config`] — Channel/connection configuration, TOML loading
//! - [`error`] — Error types

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod packet;
pub mod pool;
pub mod stats;
pub mod transport;

pub use channel::{ChannelBuffer, ChannelOption};
pub use config::{ChannelConfig, ConnectionConfig};
pub use connection::Connection;
pub use error::{ChannelError, ConfigError};
pub use message::{MessageWriter, NetMessage};
pub use packet::PacketBuffer;
pub use pool::PacketPool;
pub use transport::Transport;
