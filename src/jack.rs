//! JACK server binding.
//!
//! [`JackServer`] implements [`MidiServer`] over one `jack::Client`. Ports this
//! client registers are owned here and handed to the real-time callback, which
//! wraps them as the core's per-block buffers:
//!
//! - every owned output port gets a `jack::MidiWriter` for the block, which
//!   also clears the port buffer
//! - every owned input port is read through `jack::Port<MidiIn>::iter`
//!
//! JACK port names are matched with regular expressions, unlike the substring
//! matching of [`MockServer`](crate::mock::MockServer).

use crate::server::{MidiServer, PortFlags, ServerError, ServerResult, TransportState};
use midirelay_core::{
    MidiReadBuffer, MidiWriteBuffer, PortId, ProcessHandler, ProcessScope, ProcessStatus,
    RawEvent,
};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Owned ports per direction before the per-block buffer lists spill to the heap.
const INLINE_PORTS: usize = 16;

enum OwnedPort {
    Input(jack::Port<jack::MidiIn>),
    Output(jack::Port<jack::MidiOut>),
}

type OwnedPorts = Arc<Mutex<HashMap<PortId, OwnedPort>>>;

enum Connection {
    Closed,
    Inactive(jack::Client),
    Active(jack::AsyncClient<(), RelayProcess>),
}

impl Connection {
    fn client(&self) -> Option<&jack::Client> {
        match self {
            Connection::Closed => None,
            Connection::Inactive(client) => Some(client),
            Connection::Active(active) => Some(active.as_client()),
        }
    }
}

/// Stable ids for port names. JACK identifies ports by name on the client
/// side, the relay by `PortId`.
#[derive(Debug, Default)]
struct PortNames {
    ids: HashMap<String, PortId>,
    names: HashMap<PortId, String>,
    next: u64,
}

impl PortNames {
    fn intern(&mut self, name: &str) -> PortId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        self.next += 1;
        let id = PortId(self.next);
        self.ids.insert(name.to_string(), id);
        self.names.insert(id, name.to_string());
        id
    }

    fn name(&self, id: PortId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    fn forget(&mut self, id: PortId) {
        if let Some(name) = self.names.remove(&id) {
            self.ids.remove(&name);
        }
    }
}

fn flag_pairs() -> [(PortFlags, jack::PortFlags); 5] {
    [
        (PortFlags::IS_INPUT, jack::PortFlags::IS_INPUT),
        (PortFlags::IS_OUTPUT, jack::PortFlags::IS_OUTPUT),
        (PortFlags::IS_PHYSICAL, jack::PortFlags::IS_PHYSICAL),
        (PortFlags::CAN_MONITOR, jack::PortFlags::CAN_MONITOR),
        (PortFlags::IS_TERMINAL, jack::PortFlags::IS_TERMINAL),
    ]
}

fn to_jack_flags(flags: PortFlags) -> jack::PortFlags {
    let mut out = jack::PortFlags::empty();
    for (ours, theirs) in flag_pairs() {
        if flags.contains(ours) {
            out |= theirs;
        }
    }
    out
}

fn from_jack_flags(flags: jack::PortFlags) -> PortFlags {
    let mut out = PortFlags::empty();
    for (ours, theirs) in flag_pairs() {
        if flags.contains(theirs) {
            out |= ours;
        }
    }
    out
}

fn failed(err: jack::Error) -> ServerError {
    ServerError::Failed {
        code: -1,
        message: err.to_string(),
    }
}

/// One connection to a JACK server.
pub struct JackServer {
    connection: Mutex<Connection>,
    names: Mutex<PortNames>,
    owned: OwnedPorts,
    handler: Mutex<Option<Arc<dyn ProcessHandler>>>,
}

impl JackServer {
    pub fn new() -> Self {
        Self {
            connection: Mutex::new(Connection::Closed),
            names: Mutex::new(PortNames::default()),
            owned: Arc::new(Mutex::new(HashMap::new())),
            handler: Mutex::new(None),
        }
    }

    /// Runs `f` against the open client, or fails with `Unavailable`.
    fn with_client<T>(&self, f: impl FnOnce(&jack::Client) -> T) -> ServerResult<T> {
        let connection = self.connection.lock();
        connection.client().map(f).ok_or(ServerError::Unavailable)
    }

    /// Name of `port`, only while the server still knows it.
    fn live_name(&self, port: PortId) -> Option<String> {
        let name = self.names.lock().name(port)?.to_string();
        self.with_client(|client| client.port_by_name(&name).is_some())
            .ok()
            .filter(|exists| *exists)
            .map(|_| name)
    }
}

impl Default for JackServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let connection = self.connection.lock();
        f.debug_struct("JackServer")
            .field("client", &connection.client().map(|client| client.name()))
            .field("active", &matches!(*connection, Connection::Active(_)))
            .field("owned_ports", &self.owned.lock().len())
            .finish()
    }
}

impl MidiServer for JackServer {
    fn open(&self, client_name: &str) -> ServerResult<()> {
        let mut connection = self.connection.lock();
        if connection.client().is_some() {
            return Ok(());
        }
        let options = jack::ClientOptions::NO_START_SERVER;
        let (client, _status) = jack::Client::new(client_name, options).map_err(|e| {
            tracing::debug!("Could not open JACK client {}: {}", client_name, e);
            ServerError::Unavailable
        })?;
        tracing::debug!(
            "Opened JACK client {} at {} Hz",
            client.name(),
            client.sample_rate()
        );
        *connection = Connection::Inactive(client);
        Ok(())
    }

    fn close(&self) -> ServerResult<()> {
        self.deactivate()?;
        let mut connection = self.connection.lock();
        self.owned.lock().clear();
        *self.names.lock() = PortNames::default();
        *self.handler.lock() = None;
        *connection = Connection::Closed;
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.with_client(|client| client.sample_rate() as u32)
            .unwrap_or(0)
    }

    fn transport_frame(&self) -> u32 {
        self.with_client(|client| client.transport().query())
            .ok()
            .and_then(|query| query.ok())
            .map_or(0, |state| state.pos.frame())
    }

    fn transport_locate(&self, frame: u32) -> ServerResult<()> {
        self.with_client(|client| client.transport().locate(frame))?
            .map_err(failed)
    }

    fn transport_start(&self) {
        if let Ok(Err(e)) = self.with_client(|client| client.transport().start()) {
            tracing::warn!("JACK transport start failed: {}", e);
        }
    }

    fn transport_stop(&self) {
        if let Ok(Err(e)) = self.with_client(|client| client.transport().stop()) {
            tracing::warn!("JACK transport stop failed: {}", e);
        }
    }

    fn transport_state(&self) -> TransportState {
        let state = self
            .with_client(|client| client.transport().query_state())
            .ok()
            .and_then(|query| query.ok());
        match state {
            Some(jack::TransportState::Rolling) => TransportState::Rolling,
            Some(jack::TransportState::Stopped) | None => TransportState::Stopped,
            Some(_) => TransportState::Starting,
        }
    }

    fn port_by_name(&self, name: &str) -> Option<PortId> {
        let full_name = self
            .with_client(|client| client.port_by_name(name)?.name().ok())
            .ok()
            .flatten()?;
        Some(self.names.lock().intern(&full_name))
    }

    fn register_port(&self, name: &str, flags: PortFlags) -> ServerResult<PortId> {
        let connection = self.connection.lock();
        let client = connection.client().ok_or(ServerError::Unavailable)?;

        let (port, full_name) = if flags.contains(PortFlags::IS_INPUT) {
            let port = client
                .register_port(name, jack::MidiIn::default())
                .map_err(failed)?;
            let full_name = port.name().map_err(failed)?;
            (OwnedPort::Input(port), full_name)
        } else if flags.contains(PortFlags::IS_OUTPUT) {
            let port = client
                .register_port(name, jack::MidiOut::default())
                .map_err(failed)?;
            let full_name = port.name().map_err(failed)?;
            (OwnedPort::Output(port), full_name)
        } else {
            return Err(ServerError::Failed {
                code: -1,
                message: format!("MIDI port {} needs a direction", name),
            });
        };

        let id = self.names.lock().intern(&full_name);
        self.owned.lock().insert(id, port);
        tracing::debug!("Registered JACK port {}", full_name);
        Ok(id)
    }

    fn unregister_port(&self, port: PortId) -> ServerResult<()> {
        let connection = self.connection.lock();
        let client = connection.client().ok_or(ServerError::Unavailable)?;
        let owned = self
            .owned
            .lock()
            .remove(&port)
            .ok_or_else(|| ServerError::Failed {
                code: -1,
                message: format!("{:?} is not owned by this client", port),
            })?;
        let result = match owned {
            OwnedPort::Input(owned) => client.unregister_port(owned),
            OwnedPort::Output(owned) => client.unregister_port(owned),
        };
        self.names.lock().forget(port);
        result.map_err(failed)
    }

    fn port_name(&self, port: PortId) -> Option<String> {
        self.live_name(port)
    }

    fn port_flags(&self, port: PortId) -> PortFlags {
        let Some(name) = self.names.lock().name(port).map(str::to_string) else {
            return PortFlags::empty();
        };
        self.with_client(|client| client.port_by_name(&name).map(|port| port.flags()))
            .ok()
            .flatten()
            .map_or(PortFlags::empty(), from_jack_flags)
    }

    fn is_mine(&self, port: PortId) -> bool {
        self.owned.lock().contains_key(&port)
    }

    fn ports(
        &self,
        name_pattern: Option<&str>,
        type_pattern: Option<&str>,
        flags: PortFlags,
    ) -> Vec<String> {
        let flags = to_jack_flags(flags);
        self.with_client(|client| client.ports(name_pattern, type_pattern, flags))
            .unwrap_or_default()
    }

    fn connect(&self, source: &str, destination: &str) -> ServerResult<()> {
        match self.with_client(|client| client.connect_ports_by_name(source, destination))? {
            Ok(()) => Ok(()),
            Err(jack::Error::PortAlreadyConnected(..)) => Err(ServerError::AlreadyExists),
            Err(e) => Err(failed(e)),
        }
    }

    fn disconnect(&self, source: &str, destination: &str) -> ServerResult<()> {
        self.with_client(|client| client.disconnect_ports_by_name(source, destination))?
            .map_err(failed)
    }

    fn connections(&self, port: PortId) -> Vec<String> {
        let Some(name) = self.live_name(port) else {
            return Vec::new();
        };
        self.with_client(|client| client.port_by_name(&name).map(|port| port.get_connections()))
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn set_process_handler(&self, handler: Arc<dyn ProcessHandler>) -> ServerResult<()> {
        if matches!(*self.connection.lock(), Connection::Active(_)) {
            return Err(ServerError::Failed {
                code: -1,
                message: "process callback must be set before activation".to_string(),
            });
        }
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    fn activate(&self) -> ServerResult<()> {
        let mut connection = self.connection.lock();
        let client = match std::mem::replace(&mut *connection, Connection::Closed) {
            Connection::Inactive(client) => client,
            Connection::Closed => return Err(ServerError::Unavailable),
            active @ Connection::Active(_) => {
                *connection = active;
                return Ok(());
            }
        };
        let process = RelayProcess {
            handler: self.handler.lock().clone(),
            ports: self.owned.clone(),
        };
        let active = client.activate_async((), process).map_err(|e| {
            // The client is consumed by a failed activation
            self.owned.lock().clear();
            failed(e)
        })?;
        *connection = Connection::Active(active);
        tracing::debug!("Activated JACK client");
        Ok(())
    }

    fn deactivate(&self) -> ServerResult<()> {
        let mut connection = self.connection.lock();
        match std::mem::replace(&mut *connection, Connection::Closed) {
            Connection::Active(active) => {
                let (client, _, _) = active.deactivate().map_err(failed)?;
                *connection = Connection::Inactive(client);
                tracing::debug!("Deactivated JACK client");
            }
            other => *connection = other,
        }
        Ok(())
    }
}

/// The JACK process callback. Builds a [`JackScope`] over the owned ports and
/// runs the relay's handler on it.
struct RelayProcess {
    handler: Option<Arc<dyn ProcessHandler>>,
    ports: OwnedPorts,
}

impl jack::ProcessHandler for RelayProcess {
    fn process(&mut self, client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let mut ports = self.ports.lock();
        let mut scope = JackScope::new(client, ps, &mut ports);
        let Some(handler) = &self.handler else {
            return jack::Control::Continue;
        };
        match handler.process(&mut scope, ps.n_frames()) {
            ProcessStatus::Continue => jack::Control::Continue,
            ProcessStatus::Failed => jack::Control::Quit,
        }
    }
}

struct JackWriteBuffer<'a> {
    writer: jack::MidiWriter<'a>,
}

impl MidiWriteBuffer for JackWriteBuffer<'_> {
    fn clear(&mut self) {
        // Creating the writer already cleared the port buffer for this block
    }

    fn write(&mut self, frame_offset: u32, bytes: &[u8]) -> bool {
        let event = jack::RawMidi {
            time: frame_offset,
            bytes,
        };
        self.writer.write(&event).is_ok()
    }
}

struct JackReadBuffer<'a> {
    port: &'a jack::Port<jack::MidiIn>,
    ps: &'a jack::ProcessScope,
}

impl MidiReadBuffer for JackReadBuffer<'_> {
    fn event_count(&self) -> usize {
        self.port.iter(self.ps).count()
    }

    fn event(&self, index: usize) -> Option<RawEvent<'_>> {
        self.port.iter(self.ps).nth(index).map(|raw| RawEvent {
            frame_offset: raw.time,
            bytes: raw.bytes,
        })
    }
}

struct JackScope<'a> {
    client: &'a jack::Client,
    outputs: SmallVec<[(PortId, JackWriteBuffer<'a>); INLINE_PORTS]>,
    inputs: SmallVec<[(PortId, JackReadBuffer<'a>); INLINE_PORTS]>,
}

impl<'a> JackScope<'a> {
    fn new(
        client: &'a jack::Client,
        ps: &'a jack::ProcessScope,
        ports: &'a mut HashMap<PortId, OwnedPort>,
    ) -> Self {
        let mut outputs = SmallVec::new();
        let mut inputs = SmallVec::new();
        for (id, port) in ports.iter_mut() {
            match port {
                OwnedPort::Output(port) => {
                    let writer = port.writer(ps);
                    outputs.push((*id, JackWriteBuffer { writer }));
                }
                OwnedPort::Input(port) => {
                    inputs.push((*id, JackReadBuffer { port, ps }));
                }
            }
        }
        Self {
            client,
            outputs,
            inputs,
        }
    }
}

impl ProcessScope for JackScope<'_> {
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
        self.client
            .transport()
            .query()
            .map_or(0, |state| state.pos.frame())
    }
}
