//! Public types for the chat client.

use std::net::{IpAddr, SocketAddr};

use chatrelay_protocol::ValidationError;
use chatrelay_protocol::validation::{
    validate_address, validate_buffer_size, validate_name, validate_port,
};

/// Lifecycle of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection attempted yet.
    Idle,
    /// Dialing the server.
    Connecting,
    /// Identified and exchanging messages.
    Active,
    /// Farewell sent, waiting for the transport to close.
    Disconnecting,
    /// Terminal. A new connect starts a fresh session.
    Closed,
}

impl ClientState {
    /// `true` while the session holds an open connection.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ClientState::Connecting | ClientState::Active | ClientState::Disconnecting
        )
    }

    /// States a server shutdown or a dropped transport can end.
    pub(crate) fn can_be_ended_by_peer(self) -> bool {
        matches!(self, ClientState::Connecting | ClientState::Active)
    }
}

/// Validated connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub buffer_size: usize,
}

impl ClientSettings {
    /// Builds settings from raw user input, validating every field.
    pub fn parse(
        name: &str,
        address: &str,
        port: &str,
        buffer_size: &str,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            name: validate_name(name)?.to_string(),
            address: validate_address(address)?,
            port: validate_port(port)?,
            buffer_size: validate_buffer_size(buffer_size)?,
        })
    }

    /// Re-checks fields of settings built by hand.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        if self.port == 0 {
            return Err(ValidationError::InvalidPort(self.port.to_string()));
        }
        if self.buffer_size == 0 {
            return Err(ValidationError::InvalidBufferSize(
                self.buffer_size.to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}
