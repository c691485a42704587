//! Outbound queue: client threads enqueue, the audio thread drains.
//!
//! One mutex guards one lane per output slot. Each lane is kept sorted by
//! block-relative time (FIFO among equal times) and holds only its own
//! channel's events, so draining a channel never walks unrelated ports.
//!
//! Lane times are offsets from the start of the next block to be processed;
//! every drain subtracts the block size from the events it keeps.

use crate::config::LockPolicy;
use crate::event::Event;
use crate::registry::{ChannelId, Direction};
use crate::scope::MidiWriteBuffer;
use crate::time::seconds_to_frames;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct SendLane {
    owner: Option<ChannelId>,
    events: VecDeque<Event>,
}

/// Result of one `drain` call, folded into `ProcessStats` by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub emitted: usize,
    pub reserve_failures: usize,
    /// The lock was held and `LockPolicy::TryLock` skipped this channel.
    pub contended: bool,
}

#[derive(Debug)]
pub struct SendQueue {
    lanes: Mutex<Vec<SendLane>>,
}

impl SendQueue {
    pub fn new(channels: usize) -> Self {
        let lanes = (0..channels).map(|_| SendLane::default()).collect();
        Self {
            lanes: Mutex::new(lanes),
        }
    }

    pub(crate) fn open_lane(&self, channel: ChannelId) {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get_mut(channel.slot()) {
            lane.events.clear();
            lane.owner = Some(channel);
        }
    }

    /// Returns the number of events discarded.
    pub(crate) fn close_lane(&self, channel: ChannelId) -> usize {
        let mut lanes = self.lanes.lock();
        match lanes.get_mut(channel.slot()) {
            Some(lane) if lane.owner == Some(channel) => {
                lane.owner = None;
                let dropped = lane.events.len();
                lane.events.clear();
                dropped
            }
            _ => 0,
        }
    }

    /// Client thread. Converts `time_seconds` (relative to the next block,
    /// negative clamped to 0) to frames and inserts in time order.
    ///
    /// The event is built before the lock is taken. On error the queue is
    /// left unchanged.
    pub fn enqueue(
        &self,
        channel: ChannelId,
        time_seconds: f64,
        payload: &[u8],
        sample_rate: u32,
    ) -> Result<()> {
        if channel.direction() != Direction::Output {
            return Err(Error::InvalidDirection {
                expected: Direction::Output,
            });
        }
        let time = seconds_to_frames(time_seconds, sample_rate);
        let event = Event::new(channel, time, payload)?;
        self.insert(event)
    }

    /// Insert an event whose time is already in frames.
    pub fn insert(&self, event: Event) -> Result<()> {
        let channel = event.channel();
        let mut lanes = self.lanes.lock();
        let lane = lanes
            .get_mut(channel.slot())
            .filter(|lane| lane.owner == Some(channel))
            .ok_or(Error::UnknownChannel(channel))?;

        lane.events
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailure {
                bytes: std::mem::size_of::<Event>(),
            })?;

        let time = event.time();
        let at = lane.events.partition_point(|queued| queued.time() <= time);
        lane.events.insert(at, event);
        Ok(())
    }

    /// Audio thread, once per output channel per block.
    ///
    /// Emits every event with `time < block_size` into `buffer` and rebases the
    /// rest by `block_size`. An event whose time is not after the previous
    /// emitted one is pushed to `previous + 1` first, so the server sees
    /// strictly increasing offsets within the channel. An event the server
    /// refuses to take is dropped.
    pub fn drain(
        &self,
        channel: ChannelId,
        block_size: u32,
        buffer: &mut dyn MidiWriteBuffer,
        policy: LockPolicy,
    ) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        let Some(mut lanes) = policy.acquire(&self.lanes) else {
            outcome.contended = true;
            return outcome;
        };
        let Some(lane) = lanes
            .get_mut(channel.slot())
            .filter(|lane| lane.owner == Some(channel))
        else {
            return outcome;
        };

        let events = &mut lane.events;
        let mut last_time: Option<u32> = None;
        let mut index = 0;
        while index < events.len() {
            let mut time = events[index].time();
            if let Some(last) = last_time {
                if time <= last {
                    time = last + 1;
                    events[index].set_time(time);
                }
            }

            if time < block_size {
                if let Some(event) = events.remove(index) {
                    if buffer.write(time, event.payload()) {
                        outcome.emitted += 1;
                    } else {
                        outcome.reserve_failures += 1;
                    }
                }
                last_time = Some(time);
                continue;
            }

            events[index].set_time(time - block_size);
            index += 1;
        }
        outcome
    }

    /// Removes all queued events for one channel. Returns how many were removed.
    pub fn clear(&self, channel: ChannelId) -> usize {
        let mut lanes = self.lanes.lock();
        match lanes.get_mut(channel.slot()) {
            Some(lane) if lane.owner == Some(channel) => {
                let removed = lane.events.len();
                lane.events.clear();
                removed
            }
            _ => 0,
        }
    }

    pub fn clear_all(&self) {
        let mut lanes = self.lanes.lock();
        for lane in lanes.iter_mut() {
            lane.events.clear();
        }
    }

    pub fn pending(&self, channel: ChannelId) -> usize {
        let lanes = self.lanes.lock();
        lanes
            .get(channel.slot())
            .filter(|lane| lane.owner == Some(channel))
            .map_or(0, |lane| lane.events.len())
    }

    /// Queued times in frames relative to the next block.
    pub fn pending_times(&self, channel: ChannelId) -> Vec<u32> {
        let lanes = self.lanes.lock();
        lanes
            .get(channel.slot())
            .filter(|lane| lane.owner == Some(channel))
            .map(|lane| lane.events.iter().map(Event::time).collect())
            .unwrap_or_default()
    }
}
