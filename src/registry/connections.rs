//! Connection registry.
//!
//! Tracks the currently open connections. Membership changes only through
//! the [`PairingEngine`](super::PairingEngine), which pairs each admitted
//! connection with every registered handler.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

use crate::identifiers::ConnectionId;
use crate::transport::Channel;

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Open connections by ID.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: FxHashMap<ConnectionId, Channel>,
}

impl ConnectionRegistry {
    /// Admits a channel under a fresh ID.
    pub fn insert(&mut self, channel: Channel) -> ConnectionId {
        let id = ConnectionId::next();
        self.connections.insert(id, channel);
        id
    }

    /// Removes a connection, returning its channel if it was open.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Channel> {
        self.connections.remove(&id)
    }

    /// Returns `true` if the connection is open.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Returns the channel of an open connection.
    #[inline]
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&Channel> {
        self.connections.get(&id)
    }

    /// Iterates over open connections.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Channel)> {
        self.connections.iter().map(|(id, channel)| (*id, channel))
    }

    /// Returns the IDs of open connections.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Removes every connection.
    pub fn drain(&mut self) -> Vec<(ConnectionId, Channel)> {
        self.connections.drain().collect()
    }

    /// Returns the number of open connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is open.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
