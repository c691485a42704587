//! Error type for the midirelay client surface.
//!
//! Wraps the core and server errors so `?` propagates across crate boundaries.

use crate::server::ServerError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] midirelay_core::Error),

    #[error("Server: {0}")]
    Server(#[from] ServerError),

    #[error("Only ports created by this client can send or receive MIDI (port {port})")]
    NotMine { port: String },

    #[error("MIDI is disabled for port {port}: client has too many ports")]
    Unmanaged { port: String },

    #[error("Failed to create a port named \"{name}\"")]
    PortRegistration {
        name: String,
        #[source]
        source: ServerError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
