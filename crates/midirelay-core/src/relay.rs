//! Client-side owner of the queues, registry and stats.
//!
//! `Relay` is what client threads talk to; [`Relay::processor`] hands out the
//! shared [`BlockProcessor`] that the server drives on its real-time thread.

use crate::config::RelayConfig;
use crate::event::ReceivedEvent;
use crate::processor::BlockProcessor;
use crate::receive_queue::ReceiveQueue;
use crate::registry::{ChannelEntry, ChannelId, ChannelRegistry, Direction};
use crate::scope::PortId;
use crate::send_queue::SendQueue;
use crate::stats::{ProcessStats, StatsSnapshot};
use crate::{Error, Result};
use std::sync::Arc;

pub struct Relay {
    config: RelayConfig,
    registry: Arc<ChannelRegistry>,
    send: Arc<SendQueue>,
    receive: Arc<ReceiveQueue>,
    stats: Arc<ProcessStats>,
    processor: Arc<BlockProcessor>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RelayConfig) -> Self {
        let limit = config.max_channels_per_direction;
        let registry = Arc::new(ChannelRegistry::new(limit));
        let send = Arc::new(SendQueue::new(limit));
        let receive = Arc::new(ReceiveQueue::new(limit, config.receive_capacity));
        let stats = Arc::new(ProcessStats::new());
        let processor = Arc::new(BlockProcessor::new(
            registry.clone(),
            send.clone(),
            receive.clone(),
            stats.clone(),
            config.rt_lock_policy,
        ));
        Self {
            config,
            registry,
            send,
            receive,
            stats,
            processor,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn processor(&self) -> Arc<BlockProcessor> {
        self.processor.clone()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Fails with `CapacityExceeded` once the per-direction limit is reached;
    /// the caller decides whether the port carries on unmanaged.
    ///
    /// The lane is opened before the channel is published, so an id returned
    /// to any thread can be used immediately.
    pub fn register_channel(&self, direction: Direction, port: PortId) -> Result<ChannelId> {
        let open_lane = |id: ChannelId| match direction {
            Direction::Output => self.send.open_lane(id),
            Direction::Input => self.receive.open_lane(id),
        };
        self.registry.register_with(direction, port, open_lane)
    }

    /// Stops processing the channel and discards anything queued for it.
    pub fn unregister_channel(&self, channel: ChannelId) -> Result<()> {
        let mut dropped = 0;
        let close_lane = |id: ChannelId| {
            dropped = match id.direction() {
                Direction::Output => self.send.close_lane(id),
                Direction::Input => self.receive.close_lane(id),
            };
        };
        if self.registry.unregister_with(channel, close_lane).is_none() {
            return Err(Error::UnknownChannel(channel));
        }
        if dropped > 0 {
            tracing::debug!(
                "Discarded {} queued events for channel {}",
                dropped,
                channel
            );
        }
        Ok(())
    }

    pub fn channels(&self, direction: Direction) -> Vec<ChannelEntry> {
        self.registry.list(direction)
    }

    pub fn enqueue(
        &self,
        channel: ChannelId,
        time_seconds: f64,
        payload: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        self.send
            .enqueue(channel, time_seconds, payload, sample_rate)
    }

    /// `Ok(None)` when nothing is queued; an empty queue is not an error, an
    /// unregistered channel is.
    pub fn pop(&self, channel: ChannelId, sample_rate: u32) -> Result<Option<ReceivedEvent>> {
        self.receive.pop(channel, sample_rate)
    }

    pub fn clear_send(&self, channel: ChannelId) -> Result<()> {
        if channel.direction() != Direction::Output {
            return Err(Error::InvalidDirection {
                expected: Direction::Output,
            });
        }
        self.send.clear(channel);
        Ok(())
    }

    pub fn clear_receive(&self, channel: ChannelId) -> Result<()> {
        if channel.direction() != Direction::Input {
            return Err(Error::InvalidDirection {
                expected: Direction::Input,
            });
        }
        self.receive.clear(channel);
        Ok(())
    }

    pub fn clear_all(&self) {
        self.send.clear_all();
        self.receive.clear_all();
    }

    pub fn pending_send(&self, channel: ChannelId) -> usize {
        self.send.pending(channel)
    }

    pub fn pending_receive(&self, channel: ChannelId) -> usize {
        self.receive.pending(channel)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::build(RelayConfig::default())
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
