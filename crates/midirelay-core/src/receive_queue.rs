//! Inbound queue: the audio thread fills, client threads pop.
//!
//! One FIFO lane per input slot behind a single mutex, so `pop` is O(1)
//! regardless of how much is queued on other channels. Events are stamped
//! with absolute transport frames so a late reader still recovers when they
//! arrived.

use crate::config::LockPolicy;
use crate::event::{Event, ReceivedEvent};
use crate::registry::{ChannelId, Direction};
use crate::scope::MidiReadBuffer;
use crate::time::frames_to_seconds;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct ReceiveLane {
    owner: Option<ChannelId>,
    events: VecDeque<Event>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillOutcome {
    pub received: usize,
    /// Events the server reported but failed to hand over.
    pub read_failures: usize,
    /// Events read but not queued (allocation failure, stale channel, contention).
    pub dropped: usize,
    pub contended: bool,
}

#[derive(Debug)]
pub struct ReceiveQueue {
    lanes: Mutex<Vec<ReceiveLane>>,
    lane_capacity: usize,
}

impl ReceiveQueue {
    pub fn new(channels: usize, lane_capacity: usize) -> Self {
        let lanes = (0..channels).map(|_| ReceiveLane::default()).collect();
        Self {
            lanes: Mutex::new(lanes),
            lane_capacity,
        }
    }

    /// Client thread. Preallocates the lane so `fill` normally does not grow it.
    pub(crate) fn open_lane(&self, channel: ChannelId) {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get_mut(channel.slot()) {
            lane.events.clear();
            lane.events.reserve(self.lane_capacity);
            lane.owner = Some(channel);
        }
    }

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

    /// Audio thread, once per input channel per block.
    ///
    /// Appends every event in `buffer` with `time = block_start_frame + offset`
    /// (wrapping like the server clock). The lock is taken once for the whole
    /// batch, and not at all when the buffer is empty.
    pub fn fill(
        &self,
        channel: ChannelId,
        buffer: &dyn MidiReadBuffer,
        block_start_frame: u32,
        policy: LockPolicy,
    ) -> FillOutcome {
        let mut outcome = FillOutcome::default();
        let count = buffer.event_count();
        if count == 0 {
            return outcome;
        }

        let Some(mut lanes) = policy.acquire(&self.lanes) else {
            outcome.contended = true;
            outcome.dropped = count;
            return outcome;
        };
        let Some(lane) = lanes
            .get_mut(channel.slot())
            .filter(|lane| lane.owner == Some(channel))
        else {
            outcome.dropped = count;
            return outcome;
        };

        for index in 0..count {
            let Some(raw) = buffer.event(index) else {
                outcome.read_failures += 1;
                continue;
            };
            let time = block_start_frame.wrapping_add(raw.frame_offset);
            match Event::new(channel, time, raw.bytes) {
                Ok(event) => {
                    lane.events.push_back(event);
                    outcome.received += 1;
                }
                Err(_) => outcome.dropped += 1,
            }
        }
        outcome
    }

    /// Client thread. Oldest event for `channel`, with its time in seconds.
    ///
    /// `Ok(None)` when the lane is empty; `UnknownChannel` once the channel
    /// has been unregistered.
    pub fn pop(&self, channel: ChannelId, sample_rate: u32) -> Result<Option<ReceivedEvent>> {
        let event = self.pop_event(channel)?;
        Ok(event.map(|event| {
            let time_seconds = frames_to_seconds(event.time(), sample_rate);
            ReceivedEvent {
                payload: event.into_payload(),
                time_seconds,
            }
        }))
    }

    /// Oldest raw event for `channel` (time in absolute frames).
    pub fn pop_event(&self, channel: ChannelId) -> Result<Option<Event>> {
        if channel.direction() != Direction::Input {
            return Err(Error::InvalidDirection {
                expected: Direction::Input,
            });
        }
        let mut lanes = self.lanes.lock();
        let lane = lanes
            .get_mut(channel.slot())
            .filter(|lane| lane.owner == Some(channel))
            .ok_or(Error::UnknownChannel(channel))?;
        Ok(lane.events.pop_front())
    }

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
}
