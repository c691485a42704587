//! Relay configuration.

use crate::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Channels per direction allowed for one client.
pub const DEFAULT_MAX_CHANNELS: usize = 256;

/// Events preallocated per input channel so `fill` rarely grows a lane.
pub const DEFAULT_RECEIVE_CAPACITY: usize = 1024;

/// How the real-time thread acquires a queue mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockPolicy {
    /// Block until the client thread releases the lock.
    #[default]
    Block,
    /// Skip the channel for this block if the lock is held.
    ///
    /// Send events stay queued without being rebased; received events for
    /// that block are dropped. Both cases are counted in `ProcessStats`.
    TryLock,
}

impl LockPolicy {
    /// `None` only under `TryLock` when another thread holds the lock.
    #[inline]
    pub(crate) fn acquire<T>(self, mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
        match self {
            LockPolicy::Block => Some(mutex.lock()),
            LockPolicy::TryLock => mutex.try_lock(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub max_channels_per_direction: usize,
    pub receive_capacity: usize,
    pub rt_lock_policy: LockPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_channels_per_direction: DEFAULT_MAX_CHANNELS,
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
            rt_lock_policy: LockPolicy::Block,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_channels_per_direction == 0 {
            return Err(Error::InvalidConfig(
                "max_channels_per_direction must be at least 1".to_string(),
            ));
        }
        if self.max_channels_per_direction > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max_channels_per_direction {} exceeds {}",
                self.max_channels_per_direction,
                u16::MAX
            )));
        }
        if self.receive_capacity == 0 {
            return Err(Error::InvalidConfig(
                "receive_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
