//! A named connection to the audio server that relays MIDI for its own ports.

use crate::builder::ClientBuilder;
use crate::port::Port;
use crate::server::{MidiServer, PortFlags, ServerError};
use crate::transport::Transport;
use crate::{Error, Result};
use midirelay_core::{Direction, PortId, ProcessHandler, Relay, RelayConfig, StatsSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct ClientState {
    open: bool,
    active: bool,
}

/// Filters for [`Client::ports`].
#[derive(Debug, Clone, Default)]
pub struct PortQuery {
    pub name_pattern: Option<String>,
    pub type_pattern: Option<String>,
    pub flags: PortFlags,
    /// Only ports registered by this client.
    pub mine_only: bool,
}

impl PortQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    pub fn port_type(mut self, pattern: impl Into<String>) -> Self {
        self.type_pattern = Some(pattern.into());
        self
    }

    pub fn flags(mut self, flags: PortFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn mine_only(mut self, mine_only: bool) -> Self {
        self.mine_only = mine_only;
        self
    }
}

/// Owns the channel registry and both queues for its ports.
///
/// The connection is opened lazily by any call that needs it. Dropping the
/// client discards everything still queued and closes the connection.
pub struct Client {
    name: String,
    server: Arc<dyn MidiServer>,
    relay: Relay,
    state: Mutex<ClientState>,
}

impl Client {
    pub fn builder(name: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(name)
    }

    /// Client with the default relay configuration.
    pub fn new(name: impl Into<String>, server: Arc<dyn MidiServer>) -> Self {
        Self::from_relay(name.into(), server, Relay::default())
    }

    pub(crate) fn with_config(
        name: String,
        server: Arc<dyn MidiServer>,
        config: RelayConfig,
    ) -> Result<Self> {
        let relay = Relay::new(config)?;
        Ok(Self::from_relay(name, server, relay))
    }

    fn from_relay(name: String, server: Arc<dyn MidiServer>, relay: Relay) -> Self {
        Self {
            name,
            server,
            relay,
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn server(&self) -> &dyn MidiServer {
        self.server.as_ref()
    }

    pub(crate) fn relay(&self) -> &Relay {
        &self.relay
    }

    pub fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.open_locked(&mut state)
    }

    fn open_locked(&self, state: &mut ClientState) -> Result<()> {
        if state.open {
            return Ok(());
        }
        self.server.open(&self.name)?;
        state.open = true;
        tracing::debug!("Opened client {}", self.name);
        Ok(())
    }

    /// Deactivates if needed and disconnects from the server. Queued events
    /// are kept and go out once the client is activated again.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Ok(());
        }
        self.deactivate_locked(&mut state)?;
        self.server.close()?;
        state.open = false;
        tracing::debug!("Closed client {}", self.name);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Opens if needed and starts per-block processing.
    ///
    /// If the server refuses the process callback the client still activates,
    /// with MIDI send/receive disabled.
    pub fn activate(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.open_locked(&mut state)?;
        if state.active {
            return Ok(());
        }
        let handler: Arc<dyn ProcessHandler> = self.relay.processor();
        if let Err(e) = self.server.set_process_handler(handler) {
            tracing::warn!(
                "Failed to set a process callback for client {} ({}), MIDI send/receive will be disabled",
                self.name,
                e
            );
        }
        self.server.activate()?;
        state.active = true;
        tracing::debug!("Activated client {}", self.name);
        Ok(())
    }

    pub fn deactivate(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.deactivate_locked(&mut state)
    }

    fn deactivate_locked(&self, state: &mut ClientState) -> Result<()> {
        if !(state.active && state.open) {
            return Ok(());
        }
        self.server.deactivate()?;
        state.active = false;
        tracing::debug!("Deactivated client {}", self.name);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn sample_rate(&self) -> Result<u32> {
        self.open()?;
        Ok(self.server.sample_rate())
    }

    /// Ports known to the server, including other clients' ports unless
    /// `query.mine_only` is set.
    pub fn ports(&self, query: &PortQuery) -> Result<Vec<Port<'_>>> {
        self.open()?;
        let names = self.server.ports(
            query.name_pattern.as_deref(),
            query.type_pattern.as_deref(),
            query.flags,
        );
        Ok(names
            .iter()
            .filter_map(|name| self.lookup(name))
            .filter(|port| !query.mine_only || port.is_mine())
            .collect())
    }

    /// Existing port by exact name, without registering anything.
    pub(crate) fn lookup(&self, name: &str) -> Option<Port<'_>> {
        let id = self.server.port_by_name(name)?;
        Some(self.port_handle(id, name))
    }

    fn port_handle(&self, id: PortId, fallback_name: &str) -> Port<'_> {
        let name = self
            .server
            .port_name(id)
            .unwrap_or_else(|| fallback_name.to_string());
        let flags = self.server.port_flags(id);
        let is_mine = self.server.is_mine(id);
        let registry = self.relay.registry();
        let channel = if !is_mine {
            None
        } else if flags.contains(PortFlags::IS_INPUT) {
            registry.channel_for_port(Direction::Input, id)
        } else if flags.contains(PortFlags::IS_OUTPUT) {
            registry.channel_for_port(Direction::Output, id)
        } else {
            None
        };
        Port::new(self, id, name, flags, is_mine, channel)
    }

    /// Looks up a port by name, or registers a new MIDI port owned by this
    /// client.
    ///
    /// `name` may be a full server name or this client's short name for one
    /// of its own ports. New input and output ports get a relay channel; once
    /// the per-direction limit is reached the port is still created but stays
    /// unmanaged.
    pub fn port(&self, name: &str, flags: PortFlags) -> Result<Port<'_>> {
        self.open()?;
        if let Some(port) = self.lookup(name) {
            return Ok(port);
        }
        let qualified = format!("{}:{}", self.name, name);
        if let Some(port) = self.lookup(&qualified) {
            return Ok(port);
        }

        let id = self
            .server
            .register_port(name, flags)
            .map_err(|source| Error::PortRegistration {
                name: name.to_string(),
                source,
            })?;
        let full_name = self.server.port_name(id).unwrap_or(qualified);

        let direction = if flags.contains(PortFlags::IS_INPUT) {
            Some(Direction::Input)
        } else if flags.contains(PortFlags::IS_OUTPUT) {
            Some(Direction::Output)
        } else {
            None
        };
        if let Some(direction) = direction {
            match self.relay.register_channel(direction, id) {
                Ok(channel) => {
                    tracing::debug!(
                        "Managing MIDI for port {} on channel {}",
                        full_name,
                        channel
                    );
                }
                Err(midirelay_core::Error::CapacityExceeded { .. }) => {
                    tracing::warn!(
                        "Failed to manage the port named \"{}\" because client has too many ports. MIDI will be disabled for that port.",
                        full_name
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.port_handle(id, &full_name))
    }

    /// Connects two ports by name. `Ok(false)` if the server refused; an
    /// existing connection counts as success.
    pub fn connect(&self, source: &Port<'_>, destination: &Port<'_>) -> Result<bool> {
        self.activate()?;
        match self.server.connect(source.name(), destination.name()) {
            Ok(()) | Err(ServerError::AlreadyExists) => {
                tracing::debug!("Connected {} -> {}", source.name(), destination.name());
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to connect {} -> {} ({})",
                    source.name(),
                    destination.name(),
                    e
                );
                Ok(false)
            }
        }
    }

    pub fn disconnect(&self, source: &Port<'_>, destination: &Port<'_>) -> Result<bool> {
        self.activate()?;
        match self.server.disconnect(source.name(), destination.name()) {
            Ok(()) | Err(ServerError::AlreadyExists) => {
                tracing::debug!("Disconnected {} -> {}", source.name(), destination.name());
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to disconnect {} -> {} ({})",
                    source.name(),
                    destination.name(),
                    e
                );
                Ok(false)
            }
        }
    }

    pub fn transport(&self) -> Transport<'_> {
        Transport::new(self)
    }

    /// Counters bumped by the real-time callback.
    pub fn stats(&self) -> StatsSnapshot {
        self.relay.stats()
    }

    /// Reports real-time degradations since the last call, then resets the
    /// counters.
    pub fn log_stats(&self) -> StatsSnapshot {
        let stats = self.relay.stats();
        if stats.has_failures() {
            tracing::warn!(
                "Client {}: {} write buffers and {} read buffers unavailable, {} events not reserved, {} reads failed, {} received events dropped, {} channels skipped on contention",
                self.name,
                stats.write_buffer_unavailable,
                stats.read_buffer_unavailable,
                stats.reserve_failures,
                stats.read_failures,
                stats.receive_dropped,
                stats.lock_contended
            );
        }
        self.relay.reset_stats();
        stats
    }

    pub fn config(&self) -> &RelayConfig {
        self.relay.config()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.relay.clear_all();
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close client {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("open", &state.open)
            .field("active", &state.active)
            .field("relay", &self.relay)
            .finish()
    }
}
