//! Channel registry.
//!
//! Maps relay channels to server ports. Each direction has its own slot space
//! with a fixed limit; slots are reused after unregistration, with a generation
//! counter so a stale `ChannelId` never aliases the new owner of its slot.
//!
//! The audio thread reads per-direction snapshots through `ArcSwap` (lock-free);
//! registration swaps in a new snapshot under a client-side mutex.

use crate::scope::PortId;
use crate::{Error, Result};
use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Server to client (receive).
    Input,
    /// Client to server (send).
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    direction: Direction,
    slot: u16,
    generation: u32,
}

impl ChannelId {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Index into the per-direction lane table.
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Input => "in",
            Direction::Output => "out",
        };
        write!(f, "{}#{}.{}", dir, self.slot, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEntry {
    pub id: ChannelId,
    pub port: PortId,
}

struct SlotTable {
    /// Generation of the current or last owner, per slot.
    generations: Vec<u32>,
    occupied: Vec<bool>,
}

impl SlotTable {
    fn new(limit: usize) -> Self {
        Self {
            generations: vec![0; limit],
            occupied: vec![false; limit],
        }
    }

    fn claim(&mut self) -> Option<(u16, u32)> {
        let slot = self.occupied.iter().position(|taken| !taken)?;
        self.occupied[slot] = true;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        Some((slot as u16, self.generations[slot]))
    }

    fn release(&mut self, id: ChannelId) -> bool {
        let slot = id.slot();
        match (self.occupied.get(slot), self.generations.get(slot)) {
            (Some(true), Some(&generation)) if generation == id.generation => {
                self.occupied[slot] = false;
                true
            }
            _ => false,
        }
    }
}

pub struct ChannelRegistry {
    inputs: ArcSwap<Vec<ChannelEntry>>,
    outputs: ArcSwap<Vec<ChannelEntry>>,
    input_slots: Mutex<SlotTable>,
    output_slots: Mutex<SlotTable>,
    limit: usize,
}

impl ChannelRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            inputs: ArcSwap::from_pointee(Vec::with_capacity(limit)),
            outputs: ArcSwap::from_pointee(Vec::with_capacity(limit)),
            input_slots: Mutex::new(SlotTable::new(limit)),
            output_slots: Mutex::new(SlotTable::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn parts(&self, direction: Direction) -> (&ArcSwap<Vec<ChannelEntry>>, &Mutex<SlotTable>) {
        match direction {
            Direction::Input => (&self.inputs, &self.input_slots),
            Direction::Output => (&self.outputs, &self.output_slots),
        }
    }

    /// Registering the same port twice in the same direction returns the existing channel.
    pub fn register(&self, direction: Direction, port: PortId) -> Result<ChannelId> {
        self.register_with(direction, port, |_| {})
    }

    /// Like [`register`](Self::register), calling `on_create` with a newly
    /// claimed id before the entry becomes visible to readers. Not called when
    /// the port already has a channel.
    pub fn register_with(
        &self,
        direction: Direction,
        port: PortId,
        on_create: impl FnOnce(ChannelId),
    ) -> Result<ChannelId> {
        let (entries, slots) = self.parts(direction);
        let mut slots = slots.lock();

        if let Some(existing) = entries.load().iter().find(|entry| entry.port == port) {
            return Ok(existing.id);
        }

        let (slot, generation) = slots.claim().ok_or(Error::CapacityExceeded {
            direction,
            limit: self.limit,
        })?;
        let id = ChannelId {
            direction,
            slot,
            generation,
        };
        on_create(id);

        let current = entries.load();
        let mut next = (**current).clone();
        next.push(ChannelEntry { id, port });
        entries.store(Arc::new(next));

        tracing::debug!(
            "Registered {:?} channel {} for port {:?}",
            direction,
            id,
            port
        );
        Ok(id)
    }

    /// Returns the removed entry, or `None` if the channel was not registered.
    pub fn unregister(&self, id: ChannelId) -> Option<ChannelEntry> {
        self.unregister_with(id, |_| {})
    }

    /// Like [`unregister`](Self::unregister), calling `on_remove` after the
    /// entry is withdrawn from readers but before its slot can be reclaimed.
    pub fn unregister_with(
        &self,
        id: ChannelId,
        on_remove: impl FnOnce(ChannelId),
    ) -> Option<ChannelEntry> {
        let (entries, slots) = self.parts(id.direction);
        let mut slots = slots.lock();
        if !slots.release(id) {
            return None;
        }

        let current = entries.load();
        let removed = current.iter().find(|entry| entry.id == id).copied();
        let next: Vec<ChannelEntry> = current
            .iter()
            .filter(|entry| entry.id != id)
            .copied()
            .collect();
        entries.store(Arc::new(next));
        on_remove(id);

        tracing::debug!("Unregistered channel {}", id);
        removed
    }

    pub fn is_registered(&self, id: ChannelId) -> bool {
        let (entries, _) = self.parts(id.direction);
        entries.load().iter().any(|entry| entry.id == id)
    }

    pub fn channel_for_port(&self, direction: Direction, port: PortId) -> Option<ChannelId> {
        let (entries, _) = self.parts(direction);
        entries
            .load()
            .iter()
            .find(|entry| entry.port == port)
            .map(|entry| entry.id)
    }

    /// RT-safe (lock-free). Channels in registration order.
    #[inline]
    pub fn snapshot(&self, direction: Direction) -> Guard<Arc<Vec<ChannelEntry>>> {
        let (entries, _) = self.parts(direction);
        entries.load()
    }

    pub fn list(&self, direction: Direction) -> Vec<ChannelEntry> {
        self.snapshot(direction).to_vec()
    }

    pub fn len(&self, direction: Direction) -> usize {
        self.snapshot(direction).len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.load().is_empty() && self.outputs.load().is_empty()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("num_inputs", &self.inputs.load().len())
            .field("num_outputs", &self.outputs.load().len())
            .field("limit", &self.limit)
            .finish()
    }
}
