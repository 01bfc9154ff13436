//! # Packet Buffer Pool
//!
//! Bounded freelist of retired [`PacketBuffer`]s shared by every channel of
//! every connection built on it. Full packets go back to the pool once the
//! transport accepts them, so the steady-state send path allocates nothing.
//!
//! The ceiling caps memory held after a burst: buffers released while the
//! freelist is already at `max_free` are dropped.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::packet::PacketBuffer;
use crate::stats::PoolStats;

/// Default ceiling on idle buffers, across all connections.
pub const MAX_FREE_PACKETS: usize = 512;

/// Lock a mutex, recovering from poison (prior panic in another thread).
fn lock_or_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ─── PacketPool ──────────────────────────────────────────────────────────────

/// Shared freelist of packet buffers. Wrap in an `Arc` to share.
#[derive(Debug)]
pub struct PacketPool {
    free: Mutex<Vec<PacketBuffer>>,
    max_free: usize,
    /// Packets sitting in reliable pending queues of any channel on this pool.
    pending: AtomicUsize,
    allocated: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl PacketPool {
    /// Create an empty pool retaining at most `max_free` idle buffers.
    pub fn new(max_free: usize) -> Self {
        PacketPool {
            free: Mutex::new(Vec::with_capacity(max_free)),
            max_free,
            pending: AtomicUsize::new(0),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Take an idle buffer shaped for `max_packet_size`/`reliable`, or
    /// allocate one if the freelist is empty.
    pub fn acquire(&self, max_packet_size: usize, reliable: bool) -> PacketBuffer {
        let recycled = lock_or_recover(&self.free).pop();
        match recycled {
            Some(mut packet) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                packet.reshape(max_packet_size, reliable);
                packet
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                PacketBuffer::new(max_packet_size, reliable)
            }
        }
    }

    /// Return a buffer. Dropped if the freelist is at its ceiling.
    pub fn release(&self, packet: PacketBuffer) {
        let mut free = lock_or_recover(&self.free);
        if free.len() >= self.max_free {
            drop(free);
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        free.push(packet);
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        lock_or_recover(&self.free).len()
    }

    pub fn max_free(&self) -> usize {
        self.max_free
    }

    /// Packets queued on reliable channels using this pool.
    pub fn pending_packets(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn track_enqueue(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn track_dequeue(&self, n: usize) {
        // Never wraps below zero.
        let _ = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(n))
            });
    }

    /// Snapshot for dashboards.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle(),
            max_free: self.max_free,
            pending_packets: self.pending_packets(),
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(MAX_FREE_PACKETS)
    }
}
