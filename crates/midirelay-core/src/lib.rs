//! Real-time core of midirelay.
//!
//! Moves timestamped MIDI events between client threads and the audio
//! server's real-time callback:
//! - [`SendQueue`]: client enqueues at a time in seconds, the audio thread
//!   drains each block into the server's output buffers
//! - [`ReceiveQueue`]: the audio thread fills from input buffers, clients pop
//! - [`ChannelRegistry`]: which ports are serviced, read lock-free per block
//! - [`BlockProcessor`]: the per-block entry point the server invokes
//!
//! [`Relay`] ties these together for the client side.

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{LockPolicy, RelayConfig, DEFAULT_MAX_CHANNELS, DEFAULT_RECEIVE_CAPACITY};

mod event;
pub use event::{Event, Payload, ReceivedEvent};

pub mod time;
pub use time::{frames_to_seconds, seconds_to_frames};

mod registry;
pub use registry::{ChannelEntry, ChannelId, ChannelRegistry, Direction};

pub mod scope;
pub use scope::{
    BufferedEvent, EventBuffer, MidiReadBuffer, MidiWriteBuffer, PortId, ProcessHandler,
    ProcessScope, ProcessStatus, RawEvent,
};

mod send_queue;
pub use send_queue::{DrainOutcome, SendQueue};

mod receive_queue;
pub use receive_queue::{FillOutcome, ReceiveQueue};

mod processor;
pub use processor::BlockProcessor;

mod stats;
pub use stats::{ProcessStats, StatsSnapshot};

mod relay;
pub use relay::Relay;
