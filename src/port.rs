//! Handle to one server port, borrowed from its [`Client`].

use crate::client::Client;
use crate::server::PortFlags;
use crate::{Error, Result};
use midirelay_core::{ChannelId, Direction, PortId, ReceivedEvent};

/// A port as seen by one client. Cannot outlive the client it came from.
///
/// Only ports this client registered can send or receive; other ports are
/// still useful for connections and listings.
pub struct Port<'c> {
    client: &'c Client,
    id: PortId,
    name: String,
    flags: PortFlags,
    is_mine: bool,
    channel: Option<ChannelId>,
}

impl<'c> Port<'c> {
    pub(crate) fn new(
        client: &'c Client,
        id: PortId,
        name: String,
        flags: PortFlags,
        is_mine: bool,
        channel: Option<ChannelId>,
    ) -> Self {
        Self {
            client,
            id,
            name,
            flags,
            is_mine,
            channel,
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    /// Full server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> PortFlags {
        self.flags
    }

    pub fn is_mine(&self) -> bool {
        self.is_mine
    }

    /// Relay channel, `None` for foreign and unmanaged ports.
    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn client(&self) -> &'c Client {
        self.client
    }

    fn managed(&self, direction: Direction) -> Result<ChannelId> {
        if !self.is_mine {
            return Err(Error::NotMine {
                port: self.name.clone(),
            });
        }
        let flag = match direction {
            Direction::Input => PortFlags::IS_INPUT,
            Direction::Output => PortFlags::IS_OUTPUT,
        };
        if !self.flags.contains(flag) {
            return Err(midirelay_core::Error::InvalidDirection {
                expected: direction,
            }
            .into());
        }
        self.channel.ok_or_else(|| Error::Unmanaged {
            port: self.name.clone(),
        })
    }

    /// Queues `payload` to go out `time_seconds` after the start of the next
    /// block. Output ports only; activates the client.
    pub fn send(&self, payload: &[u8], time_seconds: f64) -> Result<()> {
        let channel = self.managed(Direction::Output)?;
        self.client.activate()?;
        let sample_rate = self.client.server().sample_rate();
        self.client
            .relay()
            .enqueue(channel, time_seconds, payload, sample_rate)?;
        Ok(())
    }

    /// Oldest received message with its transport time in seconds, or `None`
    /// if nothing is waiting. Input ports only; activates the client.
    pub fn receive(&self) -> Result<Option<ReceivedEvent>> {
        let channel = self.managed(Direction::Input)?;
        self.client.activate()?;
        let sample_rate = self.client.server().sample_rate();
        Ok(self.client.relay().pop(channel, sample_rate)?)
    }

    /// Drops everything waiting to be sent from this port. No-op for ports
    /// without a channel.
    pub fn clear_send(&self) -> Result<()> {
        match self.channel {
            Some(channel) => Ok(self.client.relay().clear_send(channel)?),
            None => Ok(()),
        }
    }

    /// Drops everything received on this port that has not been read.
    pub fn clear_receive(&self) -> Result<()> {
        match self.channel {
            Some(channel) => Ok(self.client.relay().clear_receive(channel)?),
            None => Ok(()),
        }
    }

    /// Every port connected to this one.
    pub fn connections(&self) -> Result<Vec<Port<'c>>> {
        self.client.open()?;
        let client = self.client;
        Ok(client
            .server()
            .connections(self.id)
            .iter()
            .filter_map(|name| client.lookup(name))
            .collect())
    }

    /// Removes the port from the server, then discards anything queued for
    /// it. If the server refuses, the port keeps its channel.
    pub fn unregister(self) -> Result<()> {
        if !self.is_mine {
            return Err(Error::NotMine { port: self.name });
        }
        self.client.server().unregister_port(self.id)?;
        if let Some(channel) = self.channel {
            self.client.relay().unregister_channel(channel)?;
        }
        tracing::debug!("Unregistered port {}", self.name);
        Ok(())
    }
}

impl std::fmt::Debug for Port<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("is_mine", &self.is_mine)
            .field("channel", &self.channel)
            .finish()
    }
}
