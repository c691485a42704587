//! Per-block contract with the audio server.
//!
//! The server invokes a [`ProcessHandler`] once per period on its real-time
//! thread and hands it a [`ProcessScope`] that exposes the block's port buffers
//! and transport position. Everything here is called on the audio thread.

use serde::{Deserialize, Serialize};

/// Opaque server-side port handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u64);

/// One event as reported by a server read buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent<'a> {
    /// Offset within the current block (0 = first frame).
    pub frame_offset: u32,
    pub bytes: &'a [u8],
}

/// Writable MIDI buffer for one output port and one block.
pub trait MidiWriteBuffer {
    /// Drop anything left from a previous block.
    fn clear(&mut self);

    /// Reserve room for `bytes` at `frame_offset` and copy them in. `false` if
    /// the server refuses (buffer full, offset out of range or out of order).
    fn write(&mut self, frame_offset: u32, bytes: &[u8]) -> bool;
}

/// Readable MIDI buffer for one input port and one block, ordered by offset.
pub trait MidiReadBuffer {
    fn event_count(&self) -> usize;

    /// `None` if the server fails to decode the event at `index`.
    fn event(&self, index: usize) -> Option<RawEvent<'_>>;
}

pub trait ProcessScope {
    fn write_buffer(&mut self, port: PortId, block_size: u32) -> Option<&mut dyn MidiWriteBuffer>;

    fn read_buffer(&mut self, port: PortId, block_size: u32) -> Option<&dyn MidiReadBuffer>;

    /// Transport position at the start of this block, in frames.
    fn transport_frame(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
    /// The block could not be processed at all.
    Failed,
}

/// Installed into the server as the per-period callback.
pub trait ProcessHandler: Send + Sync {
    /// Must return within the block's deadline.
    fn process(&self, scope: &mut dyn ProcessScope, block_size: u32) -> ProcessStatus;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedEvent {
    pub frame_offset: u32,
    pub bytes: Vec<u8>,
}

/// Vec-backed port buffer implementing both buffer traits.
///
/// Enforces the same rules a server MIDI buffer does: offsets inside the block,
/// non-decreasing order and a byte budget. Allocates, so intended for
/// in-memory servers and offline use, not for a hard real-time server.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Vec<BufferedEvent>,
    block_size: u32,
    byte_capacity: usize,
    used_bytes: usize,
}

impl EventBuffer {
    pub fn new(block_size: u32, byte_capacity: usize) -> Self {
        Self {
            events: Vec::new(),
            block_size,
            byte_capacity,
            used_bytes: 0,
        }
    }

    pub fn with_events(block_size: u32, events: Vec<BufferedEvent>) -> Self {
        let mut events = events;
        events.retain(|event| event.frame_offset < block_size);
        events.sort_by_key(|event| event.frame_offset);
        let used_bytes = events.iter().map(|event| event.bytes.len()).sum();
        Self {
            events,
            block_size,
            byte_capacity: used_bytes,
            used_bytes,
        }
    }

    pub fn events(&self) -> &[BufferedEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<BufferedEvent> {
        self.events
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }
}

impl MidiWriteBuffer for EventBuffer {
    fn clear(&mut self) {
        self.events.clear();
        self.used_bytes = 0;
    }

    fn write(&mut self, frame_offset: u32, bytes: &[u8]) -> bool {
        if frame_offset >= self.block_size {
            return false;
        }
        if let Some(last) = self.events.last() {
            if frame_offset < last.frame_offset {
                return false;
            }
        }
        if self.used_bytes + bytes.len() > self.byte_capacity {
            return false;
        }
        self.used_bytes += bytes.len();
        self.events.push(BufferedEvent {
            frame_offset,
            bytes: bytes.to_vec(),
        });
        true
    }
}

impl MidiReadBuffer for EventBuffer {
    fn event_count(&self) -> usize {
        self.events.len()
    }

    fn event(&self, index: usize) -> Option<RawEvent<'_>> {
        self.events.get(index).map(|event| RawEvent {
            frame_offset: event.frame_offset,
            bytes: &event.bytes,
        })
    }
}
