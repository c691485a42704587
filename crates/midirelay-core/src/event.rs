//! Timestamped MIDI event moved through the relay queues.

use crate::registry::ChannelId;
use crate::{Error, Result};
use smallvec::SmallVec;

/// Inline capacity covers every channel-voice message, so typical events
/// never touch the heap (and never free on the audio thread).
pub type Payload = SmallVec<[u8; 4]>;

/// The meaning of `time` depends on where the event lives:
/// - in the send queue: frames relative to the start of the next block to process
/// - in the receive queue: absolute transport frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    channel: ChannelId,
    time: u32,
    payload: Payload,
}

impl Event {
    /// Fails with `AllocationFailure` instead of aborting when a large
    /// payload (e.g. SysEx) cannot be allocated.
    pub fn new(channel: ChannelId, time: u32, bytes: &[u8]) -> Result<Self> {
        let mut payload = Payload::new();
        payload
            .try_reserve_exact(bytes.len())
            .map_err(|_| Error::AllocationFailure { bytes: bytes.len() })?;
        payload.extend_from_slice(bytes);
        Ok(Self {
            channel,
            time,
            payload,
        })
    }

    #[inline]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    #[inline]
    pub fn time(&self) -> u32 {
        self.time
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    #[inline]
    pub(crate) fn set_time(&mut self, time: u32) {
        self.time = time;
    }
}

/// An event handed back to a client, with its time converted to seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub payload: Payload,
    /// Absolute transport time.
    pub time_seconds: f64,
}
