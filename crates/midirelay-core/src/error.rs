//! Error types for the relay core.

use crate::registry::{ChannelId, Direction};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Failed to allocate {bytes} bytes for a MIDI event")]
    AllocationFailure { bytes: usize },

    #[error("Too many {direction:?} channels (limit {limit})")]
    CapacityExceeded { direction: Direction, limit: usize },

    #[error("Only {expected:?} channels support this operation")]
    InvalidDirection { expected: Direction },

    #[error("Unknown or unregistered channel: {0}")]
    UnknownChannel(ChannelId),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
