//! Non-real-time contract with the audio/MIDI server.
//!
//! A [`MidiServer`] is one client connection to the server: port graph,
//! transport and lifecycle. The per-block side of the contract lives in
//! [`midirelay_core::scope`].

use bitflags::bitflags;
use midirelay_core::{PortId, ProcessHandler};
use std::sync::Arc;
use thiserror::Error;

/// Port type string for raw MIDI ports.
pub const MIDI_PORT_TYPE: &str = "8 bit raw midi";

bitflags! {
    #[derive(Default)]
    pub struct PortFlags: u32 {
        /// The port receives data (clients read from it).
        const IS_INPUT = 0x1;
        /// The port produces data (clients write to it).
        const IS_OUTPUT = 0x2;
        const IS_PHYSICAL = 0x4;
        const CAN_MONITOR = 0x8;
        const IS_TERMINAL = 0x10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Rolling,
    Starting,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Audio server is not available")]
    Unavailable,

    #[error("Already exists")]
    AlreadyExists,

    #[error("Server call failed (error {code}): {message}")]
    Failed { code: i32, message: String },
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Client-thread calls into the server. None of these are invoked from the
/// real-time callback.
pub trait MidiServer: Send + Sync {
    fn open(&self, client_name: &str) -> ServerResult<()>;

    fn close(&self) -> ServerResult<()>;

    fn sample_rate(&self) -> u32;

    /// Current transport position in frames.
    fn transport_frame(&self) -> u32;

    fn transport_locate(&self, frame: u32) -> ServerResult<()>;

    fn transport_start(&self);

    fn transport_stop(&self);

    fn transport_state(&self) -> TransportState;

    fn port_by_name(&self, name: &str) -> Option<PortId>;

    /// Registers a MIDI port owned by this client. `name` is the short name;
    /// the server may qualify it (see [`MidiServer::port_name`]).
    fn register_port(&self, name: &str, flags: PortFlags) -> ServerResult<PortId>;

    fn unregister_port(&self, port: PortId) -> ServerResult<()>;

    fn port_name(&self, port: PortId) -> Option<String>;

    fn port_flags(&self, port: PortId) -> PortFlags;

    /// Whether `port` was registered through this connection.
    fn is_mine(&self, port: PortId) -> bool;

    /// Names of ports matching all given filters. `flags` must all be set on a
    /// matching port; empty flags match everything.
    fn ports(
        &self,
        name_pattern: Option<&str>,
        type_pattern: Option<&str>,
        flags: PortFlags,
    ) -> Vec<String>;

    /// `Err(ServerError::AlreadyExists)` if the ports are already connected.
    fn connect(&self, source: &str, destination: &str) -> ServerResult<()>;

    fn disconnect(&self, source: &str, destination: &str) -> ServerResult<()>;

    /// Names of every port connected to `port`.
    fn connections(&self, port: PortId) -> Vec<String>;

    /// Installs the per-block callback. Must be called before `activate`.
    fn set_process_handler(&self, handler: Arc<dyn ProcessHandler>) -> ServerResult<()>;

    fn activate(&self) -> ServerResult<()>;

    fn deactivate(&self) -> ServerResult<()>;
}
