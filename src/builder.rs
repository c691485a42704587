//! Builder for configuring and constructing a [`Client`].

use crate::client::Client;
use crate::server::MidiServer;
use crate::Result;
use midirelay_core::{LockPolicy, RelayConfig};
use std::sync::Arc;

/// # Example
///
/// ```ignore
/// use midirelay::prelude::*;
///
/// let client = Client::builder("sequencer")
///     .max_channels(16)
///     .lock_policy(LockPolicy::TryLock)
///     .build(server)?;
///
/// let out = client.port("out", PortFlags::IS_OUTPUT)?;
/// out.send(&[0x90, 60, 100], 0.0)?;
/// ```
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    name: String,
    config: RelayConfig,
}

impl ClientBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: RelayConfig::default(),
        }
    }

    /// Channels per direction that get MIDI send/receive.
    pub fn max_channels(mut self, max: usize) -> Self {
        self.config.max_channels_per_direction = max;
        self
    }

    /// Events preallocated per input channel.
    pub fn receive_capacity(mut self, capacity: usize) -> Self {
        self.config.receive_capacity = capacity;
        self
    }

    /// How the real-time callback acquires the queue locks.
    pub fn lock_policy(mut self, policy: LockPolicy) -> Self {
        self.config.rt_lock_policy = policy;
        self
    }

    /// Replaces every relay setting at once.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration. Does not connect to the server yet.
    pub fn build(self, server: Arc<dyn MidiServer>) -> Result<Client> {
        Client::with_config(self.name, server, self.config)
    }
}
