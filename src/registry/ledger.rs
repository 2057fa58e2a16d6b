//! Registration ledger.
//!
//! Arena of pairings keyed by [`PairingId`], indexed three ways:
//!
//! ```text
//!   by_pair        (ConnectionId, HandlerId) ──► PairingId
//!   by_connection  ConnectionId ──► {PairingId}
//!   by_handler     HandlerId    ──► {PairingId}
//!                                     │
//!   pairings       PairingId ──► { connection, handler, slot }
//! ```
//!
//! A slot is reserved (`Installing`) before the capability runs and filled
//! (`Live`) afterwards. Every removal path clears all three indices at once
//! and hands back the live resource, so each resource leaves the ledger
//! exactly once.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::{FxHashMap, FxHashSet};

use crate::disposable::Disposable;
use crate::identifiers::{ConnectionId, HandlerId, PairingId};

// ============================================================================
// Slot
// ============================================================================

enum Slot {
    /// Reserved; the capability is being installed outside the engine lock.
    Installing,
    /// Installed; holds the resource to release.
    Live(Disposable),
}

struct Entry {
    connection: ConnectionId,
    handler: HandlerId,
    slot: Slot,
}

// ============================================================================
// Ledger
// ============================================================================

/// Bookkeeping of active (connection, handler) pairings.
#[derive(Default)]
pub struct Ledger {
    pairings: FxHashMap<PairingId, Entry>,
    by_pair: FxHashMap<(ConnectionId, HandlerId), PairingId>,
    by_connection: FxHashMap<ConnectionId, FxHashSet<PairingId>>,
    by_handler: FxHashMap<HandlerId, FxHashSet<PairingId>>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot for `(connection, handler)`.
    ///
    /// Returns `None` if the pair already has a slot, reserved or live.
    pub fn reserve(&mut self, connection: ConnectionId, handler: HandlerId) -> Option<PairingId> {
        if self.by_pair.contains_key(&(connection, handler)) {
            return None;
        }

        let id = PairingId::next();
        self.pairings.insert(
            id,
            Entry {
                connection,
                handler,
                slot: Slot::Installing,
            },
        );
        self.by_pair.insert((connection, handler), id);
        self.by_connection.entry(connection).or_default().insert(id);
        self.by_handler.entry(handler).or_default().insert(id);

        Some(id)
    }

    /// Fills a reserved slot with its installed resource.
    ///
    /// # Errors
    ///
    /// Gives the resource back if the reservation was removed in the
    /// meantime; the caller must release it.
    pub fn commit(&mut self, id: PairingId, resource: Disposable) -> Result<(), Disposable> {
        match self.pairings.get_mut(&id) {
            Some(entry) => {
                debug_assert!(
                    matches!(entry.slot, Slot::Installing),
                    "pairing {id} committed twice"
                );
                entry.slot = Slot::Live(resource);
                Ok(())
            }
            None => Err(resource),
        }
    }

    /// Removes one pairing from every index.
    ///
    /// Returns its resource if it was live. Removing an unknown or already
    /// removed pairing returns `None`.
    pub fn remove(&mut self, id: PairingId) -> Option<Disposable> {
        let entry = self.pairings.remove(&id)?;

        self.by_pair.remove(&(entry.connection, entry.handler));
        Self::unindex(&mut self.by_connection, entry.connection, id);
        Self::unindex(&mut self.by_handler, entry.handler, id);

        match entry.slot {
            Slot::Live(resource) => Some(resource),
            Slot::Installing => None,
        }
    }

    /// Removes every pairing of a connection, returning the live resources.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<Disposable> {
        let ids = self.by_connection.remove(&connection).unwrap_or_default();
        self.remove_all(ids)
    }

    /// Removes every pairing of a handler, returning the live resources.
    pub fn remove_handler(&mut self, handler: HandlerId) -> Vec<Disposable> {
        let ids = self.by_handler.remove(&handler).unwrap_or_default();
        self.remove_all(ids)
    }

    /// Removes every pairing, returning the live resources.
    pub fn drain(&mut self) -> Vec<Disposable> {
        let ids: Vec<_> = self.pairings.keys().copied().collect();
        self.remove_all(ids)
    }

    /// Returns `true` if `(connection, handler)` has a live pairing.
    #[must_use]
    pub fn is_live(&self, connection: ConnectionId, handler: HandlerId) -> bool {
        self.by_pair
            .get(&(connection, handler))
            .and_then(|id| self.pairings.get(id))
            .is_some_and(|entry| matches!(entry.slot, Slot::Live(_)))
    }

    /// Returns the number of pairings, reserved or live.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairings.len()
    }

    /// Returns `true` if the ledger holds no pairing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairings.is_empty()
    }

    /// Returns every live pairing.
    #[must_use]
    pub fn live_pairs(&self) -> Vec<(PairingId, ConnectionId, HandlerId)> {
        self.pairings
            .iter()
            .filter(|(_, entry)| matches!(entry.slot, Slot::Live(_)))
            .map(|(id, entry)| (*id, entry.connection, entry.handler))
            .collect()
    }

    fn remove_all(&mut self, ids: impl IntoIterator<Item = PairingId>) -> Vec<Disposable> {
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    fn unindex<K: std::hash::Hash + Eq>(
        index: &mut FxHashMap<K, FxHashSet<PairingId>>,
        key: K,
        id: PairingId,
    ) {
        if let Some(ids) = index.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                index.remove(&key);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
