//! Authoritative set of identified clients.
//!
//! Every operation takes the same lock, so joins and departures arriving
//! concurrently from different read pumps are serialized.

use chatrelay_connection::{Connection, ConnectionId};
use tokio::sync::Mutex;

/// One identified client.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: ConnectionId,
    pub name: String,
    pub connection: Connection,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("connection {0} is not registered")]
    NotFound(ConnectionId),

    #[error("connection {0} is already closed")]
    Closed(ConnectionId),
}

/// Registered clients in insertion order.
///
/// A connection id appears at most once. Display names are not required to
/// be unique.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    entries: Mutex<Vec<RegistryEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection` under `name`.
    ///
    /// A connection that is already closed is refused, so nothing closed
    /// before a [`drain`](Self::drain) can slip in after it.
    pub async fn add(
        &self,
        connection: Connection,
        name: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let id = connection.id();
        let mut entries = self.entries.lock().await;
        if !connection.is_open() {
            return Err(RegistryError::Closed(id));
        }
        if entries.iter().any(|e| e.id == id) {
            return Err(RegistryError::DuplicateConnection(id));
        }
        entries.push(RegistryEntry {
            id,
            name: name.into(),
            connection,
        });
        Ok(())
    }

    /// Removes and returns the entry for `id`.
    pub async fn remove(&self, id: ConnectionId) -> Result<RegistryEntry, RegistryError> {
        let mut entries = self.entries.lock().await;
        let pos = entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(RegistryError::NotFound(id))?;
        Ok(entries.remove(pos))
    }

    /// Display names in insertion order.
    pub async fn list(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Consistent copy of every entry, taken under the lock.
    pub async fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<RegistryEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.entries.lock().await.iter().any(|e| e.id == id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Removes every entry at once (server shutdown).
    pub async fn drain(&self) -> Vec<RegistryEntry> {
        std::mem::take(&mut *self.entries.lock().await)
    }
}
