//! In-memory [`MidiServer`] for tests and offline use.
//!
//! Keeps a port graph and a transport, and runs process cycles only when asked
//! via [`MockServer::run_cycle`], which may be called from any thread. Output
//! buffers are reused between cycles like a real server's, so whatever the
//! handler leaves in them is reported again on the next cycle.

use crate::server::{
    MidiServer, PortFlags, ServerError, ServerResult, TransportState, MIDI_PORT_TYPE,
};
use midirelay_core::{
    BufferedEvent, EventBuffer, MidiReadBuffer, MidiWriteBuffer, PortId, ProcessHandler,
    ProcessScope, ProcessStatus,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Bytes each output buffer can hold per cycle unless changed.
pub const DEFAULT_BUFFER_BYTES: usize = 4096;

/// One event a handler wrote to an output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedEvent {
    pub cycle: u64,
    /// Transport frame at the start of the cycle plus the in-block offset.
    pub frame: u32,
    pub frame_offset: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct MockPort {
    name: String,
    flags: PortFlags,
    mine: bool,
    injected: Vec<BufferedEvent>,
    buffer: Option<EventBuffer>,
    emitted: Vec<EmittedEvent>,
}

impl MockPort {
    fn new(name: String, flags: PortFlags, mine: bool) -> Self {
        Self {
            name,
            flags,
            mine,
            injected: Vec::new(),
            buffer: None,
            emitted: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct MockState {
    client_name: Option<String>,
    available: bool,
    active: bool,
    sample_rate: u32,
    transport_frame: u32,
    transport: TransportState,
    next_port: u64,
    ports: BTreeMap<PortId, MockPort>,
    connections: BTreeSet<(String, String)>,
    write_buffers: bool,
    read_buffers: bool,
    byte_capacity: usize,
    refuse_handler: bool,
    refuse_locate: bool,
    refuse_unregister: bool,
    cycles: u64,
}

impl MockState {
    fn port_id(&self, name: &str) -> Option<PortId> {
        self.ports
            .iter()
            .find(|(_, port)| port.name == name)
            .map(|(id, _)| *id)
    }

    fn require_open(&self) -> ServerResult<&str> {
        self.client_name.as_deref().ok_or(ServerError::Unavailable)
    }
}

struct MockScope {
    outputs: Vec<(PortId, EventBuffer)>,
    inputs: Vec<(PortId, EventBuffer)>,
    transport_frame: u32,
}

impl ProcessScope for MockScope {
    fn write_buffer(&mut self, port: PortId, _block_size: u32) -> Option<&mut dyn MidiWriteBuffer> {
        self.outputs
            .iter_mut()
            .find(|(id, _)| *id == port)
            .map(|(_, buffer)| buffer as &mut dyn MidiWriteBuffer)
    }

    fn read_buffer(&mut self, port: PortId, _block_size: u32) -> Option<&dyn MidiReadBuffer> {
        self.inputs
            .iter()
            .find(|(id, _)| *id == port)
            .map(|(_, buffer)| buffer as &dyn MidiReadBuffer)
    }

    fn transport_frame(&self) -> u32 {
        self.transport_frame
    }
}

pub struct MockServer {
    state: Mutex<MockState>,
    handler: Mutex<Option<Arc<dyn ProcessHandler>>>,
}

impl MockServer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Mutex::new(MockState {
                client_name: None,
                available: true,
                active: false,
                sample_rate,
                transport_frame: 0,
                transport: TransportState::Stopped,
                next_port: 1,
                ports: BTreeMap::new(),
                connections: BTreeSet::new(),
                write_buffers: true,
                read_buffers: true,
                byte_capacity: DEFAULT_BUFFER_BYTES,
                refuse_handler: false,
                refuse_locate: false,
                refuse_unregister: false,
                cycles: 0,
            }),
            handler: Mutex::new(None),
        }
    }

    /// Adds a port owned by some other client, e.g. a hardware port.
    pub fn add_external_port(&self, name: &str, flags: PortFlags) -> PortId {
        let mut state = self.state.lock();
        let id = PortId(state.next_port);
        state.next_port += 1;
        state
            .ports
            .insert(id, MockPort::new(name.to_string(), flags, false));
        id
    }

    /// Queues an event for `port`'s read buffer on the next cycle. Offsets
    /// outside that cycle's block are dropped.
    pub fn inject(&self, port: PortId, frame_offset: u32, bytes: &[u8]) {
        let mut state = self.state.lock();
        if let Some(port) = state.ports.get_mut(&port) {
            port.injected.push(BufferedEvent {
                frame_offset,
                bytes: bytes.to_vec(),
            });
        }
    }

    /// Runs one process cycle if the server is active and has a handler.
    ///
    /// The handler is called without any server lock held, so client calls
    /// from other threads proceed while it runs. The transport advances by
    /// `block_size` afterwards if it is rolling.
    pub fn run_cycle(&self, block_size: u32) -> Option<ProcessStatus> {
        let handler = self.handler.lock().clone()?;

        let (mut scope, cycle) = {
            let mut state = self.state.lock();
            if !state.active {
                return None;
            }
            let write_buffers = state.write_buffers;
            let read_buffers = state.read_buffers;
            let byte_capacity = state.byte_capacity;
            let mut outputs = Vec::new();
            let mut inputs = Vec::new();
            for (id, port) in state.ports.iter_mut().filter(|(_, port)| port.mine) {
                if port.flags.contains(PortFlags::IS_OUTPUT) && write_buffers {
                    let buffer = port
                        .buffer
                        .take()
                        .filter(|buffer| buffer.block_size() == block_size)
                        .unwrap_or_else(|| EventBuffer::new(block_size, byte_capacity));
                    outputs.push((*id, buffer));
                }
                if port.flags.contains(PortFlags::IS_INPUT) && read_buffers {
                    let events = std::mem::take(&mut port.injected);
                    inputs.push((*id, EventBuffer::with_events(block_size, events)));
                }
            }
            let scope = MockScope {
                outputs,
                inputs,
                transport_frame: state.transport_frame,
            };
            (scope, state.cycles)
        };

        let status = handler.process(&mut scope, block_size);

        let mut state = self.state.lock();
        for (id, buffer) in scope.outputs {
            if let Some(port) = state.ports.get_mut(&id) {
                port.emitted
                    .extend(buffer.events().iter().map(|event| EmittedEvent {
                        cycle,
                        frame: scope.transport_frame.wrapping_add(event.frame_offset),
                        frame_offset: event.frame_offset,
                        bytes: event.bytes.clone(),
                    }));
                port.buffer = Some(buffer);
            }
        }
        state.cycles += 1;
        if state.transport == TransportState::Rolling {
            state.transport_frame = state.transport_frame.wrapping_add(block_size);
        }
        Some(status)
    }

    /// Runs `count` cycles; returns how many actually ran.
    pub fn run_cycles(&self, count: usize, block_size: u32) -> usize {
        (0..count)
            .take_while(|_| self.run_cycle(block_size).is_some())
            .count()
    }

    /// Everything written to `port` so far, oldest first.
    pub fn emitted(&self, port: PortId) -> Vec<EmittedEvent> {
        self.state
            .lock()
            .ports
            .get(&port)
            .map(|port| port.emitted.clone())
            .unwrap_or_default()
    }

    pub fn take_emitted(&self, port: PortId) -> Vec<EmittedEvent> {
        self.state
            .lock()
            .ports
            .get_mut(&port)
            .map(|port| std::mem::take(&mut port.emitted))
            .unwrap_or_default()
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.state.lock().sample_rate = sample_rate;
    }

    pub fn set_write_buffers_available(&self, available: bool) {
        self.state.lock().write_buffers = available;
    }

    pub fn set_read_buffers_available(&self, available: bool) {
        self.state.lock().read_buffers = available;
    }

    pub fn set_buffer_bytes(&self, bytes: usize) {
        let mut state = self.state.lock();
        state.byte_capacity = bytes;
        for port in state.ports.values_mut() {
            port.buffer = None;
        }
    }

    pub fn refuse_process_handler(&self, refuse: bool) {
        self.state.lock().refuse_handler = refuse;
    }

    pub fn refuse_locate(&self, refuse: bool) {
        self.state.lock().refuse_locate = refuse;
    }

    pub fn refuse_unregister(&self, refuse: bool) {
        self.state.lock().refuse_unregister = refuse;
    }

    pub fn client_name(&self) -> Option<String> {
        self.state.lock().client_name.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().client_name.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn cycles(&self) -> u64 {
        self.state.lock().cycles
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new(48000)
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockServer")
            .field("client_name", &state.client_name)
            .field("active", &state.active)
            .field("ports", &state.ports.len())
            .field("cycles", &state.cycles)
            .finish()
    }
}

impl MidiServer for MockServer {
    fn open(&self, client_name: &str) -> ServerResult<()> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(ServerError::Unavailable);
        }
        state.client_name = Some(client_name.to_string());
        Ok(())
    }

    fn close(&self) -> ServerResult<()> {
        let mut state = self.state.lock();
        state.client_name = None;
        state.active = false;
        drop(state);
        *self.handler.lock() = None;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    fn transport_frame(&self) -> u32 {
        self.state.lock().transport_frame
    }

    fn transport_locate(&self, frame: u32) -> ServerResult<()> {
        let mut state = self.state.lock();
        if state.refuse_locate {
            return Err(ServerError::Failed {
                code: -1,
                message: "locate refused".to_string(),
            });
        }
        state.transport_frame = frame;
        Ok(())
    }

    fn transport_start(&self) {
        self.state.lock().transport = TransportState::Rolling;
    }

    fn transport_stop(&self) {
        self.state.lock().transport = TransportState::Stopped;
    }

    fn transport_state(&self) -> TransportState {
        self.state.lock().transport
    }

    fn port_by_name(&self, name: &str) -> Option<PortId> {
        self.state.lock().port_id(name)
    }

    fn register_port(&self, name: &str, flags: PortFlags) -> ServerResult<PortId> {
        let mut state = self.state.lock();
        let full_name = format!("{}:{}", state.require_open()?, name);
        if state.port_id(&full_name).is_some() {
            return Err(ServerError::Failed {
                code: -1,
                message: format!("port name {} in use", full_name),
            });
        }
        let id = PortId(state.next_port);
        state.next_port += 1;
        let port = MockPort::new(full_name, flags, true);
        state.ports.insert(id, port);
        Ok(id)
    }

    fn unregister_port(&self, port: PortId) -> ServerResult<()> {
        let mut state = self.state.lock();
        if state.refuse_unregister {
            return Err(ServerError::Failed {
                code: -1,
                message: "unregister refused".to_string(),
            });
        }
        let removed = state.ports.remove(&port).ok_or(ServerError::Failed {
            code: -1,
            message: format!("no port {:?}", port),
        })?;
        state.connections.retain(|(source, destination)| {
            *source != removed.name && *destination != removed.name
        });
        Ok(())
    }

    fn port_name(&self, port: PortId) -> Option<String> {
        let state = self.state.lock();
        state.ports.get(&port).map(|port| port.name.clone())
    }

    fn port_flags(&self, port: PortId) -> PortFlags {
        self.state
            .lock()
            .ports
            .get(&port)
            .map_or(PortFlags::empty(), |port| port.flags)
    }

    fn is_mine(&self, port: PortId) -> bool {
        self.state
            .lock()
            .ports
            .get(&port)
            .map_or(false, |port| port.mine)
    }

    fn ports(
        &self,
        name_pattern: Option<&str>,
        type_pattern: Option<&str>,
        flags: PortFlags,
    ) -> Vec<String> {
        if type_pattern.map_or(false, |pattern| !MIDI_PORT_TYPE.contains(pattern)) {
            return Vec::new();
        }
        self.state
            .lock()
            .ports
            .values()
            .filter(|port| name_pattern.map_or(true, |pattern| port.name.contains(pattern)))
            .filter(|port| port.flags.contains(flags))
            .map(|port| port.name.clone())
            .collect()
    }

    fn connect(&self, source: &str, destination: &str) -> ServerResult<()> {
        let mut state = self.state.lock();
        if state.port_id(source).is_none() || state.port_id(destination).is_none() {
            return Err(ServerError::Failed {
                code: -1,
                message: format!("cannot connect {} to {}", source, destination),
            });
        }
        if !state
            .connections
            .insert((source.to_string(), destination.to_string()))
        {
            return Err(ServerError::AlreadyExists);
        }
        Ok(())
    }

    fn disconnect(&self, source: &str, destination: &str) -> ServerResult<()> {
        let mut state = self.state.lock();
        if !state
            .connections
            .remove(&(source.to_string(), destination.to_string()))
        {
            return Err(ServerError::Failed {
                code: -1,
                message: format!("{} is not connected to {}", source, destination),
            });
        }
        Ok(())
    }

    fn connections(&self, port: PortId) -> Vec<String> {
        let state = self.state.lock();
        let Some(name) = state.ports.get(&port).map(|port| port.name.as_str()) else {
            return Vec::new();
        };
        state
            .connections
            .iter()
            .filter_map(|(source, destination)| {
                if source == name {
                    Some(destination.clone())
                } else if destination == name {
                    Some(source.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    fn set_process_handler(&self, handler: Arc<dyn ProcessHandler>) -> ServerResult<()> {
        if self.state.lock().refuse_handler {
            return Err(ServerError::Failed {
                code: -1,
                message: "process callback refused".to_string(),
            });
        }
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    fn activate(&self) -> ServerResult<()> {
        let mut state = self.state.lock();
        state.require_open()?;
        state.active = true;
        Ok(())
    }

    fn deactivate(&self) -> ServerResult<()> {
        self.state.lock().active = false;
        Ok(())
    }
}
