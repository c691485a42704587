//! Real-time failure counters.
//!
//! The audio thread never logs; it bumps these relaxed atomics instead, and a
//! client thread reads a [`StatsSnapshot`] to report problems.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ProcessStats {
    blocks: AtomicU64,
    events_sent: AtomicU64,
    events_received: AtomicU64,
    write_buffer_unavailable: AtomicU64,
    read_buffer_unavailable: AtomicU64,
    reserve_failures: AtomicU64,
    read_failures: AtomicU64,
    receive_dropped: AtomicU64,
    lock_contended: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub blocks: u64,
    pub events_sent: u64,
    pub events_received: u64,
    /// Output channel skipped because the server gave no write buffer.
    pub write_buffer_unavailable: u64,
    /// Input channel skipped because the server gave no read buffer.
    pub read_buffer_unavailable: u64,
    /// Outbound events dropped because the server refused to reserve space.
    pub reserve_failures: u64,
    /// Inbound events the server failed to hand over.
    pub read_failures: u64,
    /// Inbound events dropped after being read (allocation, stale channel, contention).
    pub receive_dropped: u64,
    /// Channels skipped under `LockPolicy::TryLock`.
    pub lock_contended: u64,
}

impl StatsSnapshot {
    /// True if any degradation counter is non-zero.
    pub fn has_failures(&self) -> bool {
        self.write_buffer_unavailable
            + self.read_buffer_unavailable
            + self.reserve_failures
            + self.read_failures
            + self.receive_dropped
            + self.lock_contended
            > 0
    }
}

macro_rules! counter {
    ($name:ident, $field:ident) => {
        #[inline]
        pub(crate) fn $name(&self, n: u64) {
            if n > 0 {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        }
    };
}

impl ProcessStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(add_blocks, blocks);
    counter!(add_sent, events_sent);
    counter!(add_received, events_received);
    counter!(add_write_unavailable, write_buffer_unavailable);
    counter!(add_read_unavailable, read_buffer_unavailable);
    counter!(add_reserve_failures, reserve_failures);
    counter!(add_read_failures, read_failures);
    counter!(add_receive_dropped, receive_dropped);
    counter!(add_lock_contended, lock_contended);

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            write_buffer_unavailable: self.write_buffer_unavailable.load(Ordering::Relaxed),
            read_buffer_unavailable: self.read_buffer_unavailable.load(Ordering::Relaxed),
            reserve_failures: self.reserve_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            receive_dropped: self.receive_dropped.load(Ordering::Relaxed),
            lock_contended: self.lock_contended.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.blocks,
            &self.events_sent,
            &self.events_received,
            &self.write_buffer_unavailable,
            &self.read_buffer_unavailable,
            &self.reserve_failures,
            &self.read_failures,
            &self.receive_dropped,
            &self.lock_contended,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
