//! Fan-out of encoded frames to registered clients.
//!
//! A failed write to one recipient is logged and skipped; it never aborts
//! delivery to the rest. Failed recipients stay registered: they are removed
//! only by their own read pump noticing the failure.

use std::sync::Arc;

use bytes::Bytes;
use chatrelay_connection::{ConnectionError, ConnectionId};
use chatrelay_protocol::{Frame, ProtocolError, encode_frame};
use tracing::{trace, warn};

use crate::registry::ClientRegistry;

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<ConnectionId>,
}

/// Error from a point-to-point send.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection {0} is not registered")]
    NotRegistered(ConnectionId),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Delivers frames to the clients of a [`ClientRegistry`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Writes `bytes` to every registered client except `exclude`.
    ///
    /// Iterates a snapshot of the registry, so a departure in the middle of
    /// the broadcast does not change who this call targets.
    pub async fn broadcast(&self, bytes: Bytes, exclude: Option<ConnectionId>) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for entry in self.registry.snapshot().await {
            if Some(entry.id) == exclude {
                continue;
            }
            match entry.connection.write(bytes.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(conn = %entry.id, name = %entry.name, "broadcast delivery failed: {e}");
                    report.failed.push(entry.id);
                }
            }
        }

        trace!(
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast done"
        );
        report
    }

    /// Encodes `frame` once and broadcasts it.
    pub async fn broadcast_frame(
        &self,
        frame: &Frame,
        exclude: Option<ConnectionId>,
    ) -> Result<DeliveryReport, ProtocolError> {
        let bytes = encode_frame(frame)?;
        Ok(self.broadcast(bytes, exclude).await)
    }

    /// Writes `bytes` to exactly one registered client.
    pub async fn send_to(&self, id: ConnectionId, bytes: Bytes) -> Result<(), SendError> {
        let entry = self
            .registry
            .get(id)
            .await
            .ok_or(SendError::NotRegistered(id))?;
        entry.connection.write(bytes)?;
        Ok(())
    }
}
