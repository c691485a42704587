//! # midirelay - MIDI send/receive for audio server clients
//!
//! Lets ordinary threads send and receive timestamped MIDI through ports on a
//! real-time audio server, without touching the server's process callback.
//!
//! ## Architecture
//!
//! - **midirelay-core** - queues, channel registry and the per-block processor
//!   that runs on the server's real-time thread
//! - **midirelay** - the client surface: [`Client`], [`Port`], [`Transport`]
//!   and the [`MidiServer`] trait a server binding implements
//!
//! ## Quick Start
//!
//! ```ignore
//! use midirelay::prelude::*;
//!
//! let client = Client::new("sequencer", server);
//! let out = client.port("out", PortFlags::IS_OUTPUT)?;
//! let input = client.port("in", PortFlags::IS_INPUT)?;
//!
//! // Note on now, note off half a second later
//! out.send(&[0x90, 60, 100], 0.0)?;
//! out.send(&[0x80, 60, 0], 0.5)?;
//!
//! while let Some(event) = input.receive()? {
//!     println!("{:?} at {:.3}s", event.payload, event.time_seconds);
//! }
//! ```

/// Re-export of midirelay-core for direct access
pub use midirelay_core as core;

pub use midirelay_core::{
    frames_to_seconds, seconds_to_frames, ChannelId, Direction, LockPolicy, Payload, PortId,
    ProcessHandler, ProcessScope, ProcessStatus, ReceivedEvent, RelayConfig, StatsSnapshot,
};

mod error;
pub use error::{Error, Result};

pub mod server;
pub use server::{MidiServer, PortFlags, ServerError, ServerResult, TransportState, MIDI_PORT_TYPE};

mod builder;
pub use builder::ClientBuilder;

mod client;
pub use client::{Client, PortQuery};

mod port;
pub use port::Port;

mod transport;
pub use transport::Transport;

pub mod mock;

#[cfg(feature = "jack")]
pub mod jack;

pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, Direction, Error, LockPolicy, MidiServer, Port, PortFlags,
        PortQuery, ReceivedEvent, Result, Transport,
    };
}
