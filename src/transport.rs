//! Server transport, seen through a [`Client`].

use crate::client::Client;
use crate::server::TransportState;
use crate::Result;
use midirelay_core::{frames_to_seconds, seconds_to_frames};

/// Borrowed view of the server transport. Cannot outlive its client.
#[derive(Debug, Clone, Copy)]
pub struct Transport<'c> {
    client: &'c Client,
}

impl<'c> Transport<'c> {
    pub(crate) fn new(client: &'c Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &'c Client {
        self.client
    }

    /// Current position in seconds.
    pub fn time(&self) -> Result<f64> {
        self.client.open()?;
        let server = self.client.server();
        let frame = server.transport_frame();
        Ok(frames_to_seconds(frame, server.sample_rate()))
    }

    /// Requests a locate to `seconds` (negative means 0). A refused locate is
    /// logged, not returned.
    pub fn set_time(&self, seconds: f64) -> Result<()> {
        self.client.open()?;
        let server = self.client.server();
        let frame = seconds_to_frames(seconds, server.sample_rate());
        if let Err(e) = server.transport_locate(frame) {
            tracing::warn!("Failed to set transport location to {} ({})", seconds, e);
        }
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        self.client.open()?;
        self.client.server().transport_start();
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.client.open()?;
        self.client.server().transport_stop();
        Ok(())
    }

    pub fn is_rolling(&self) -> Result<bool> {
        self.client.open()?;
        let state = self.client.server().transport_state();
        Ok(state == TransportState::Rolling)
    }

    pub fn set_rolling(&self, rolling: bool) -> Result<()> {
        if rolling {
            self.start()
        } else {
            self.stop()
        }
    }
}
