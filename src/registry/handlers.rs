//! Handler registry.
//!
//! Tracks the currently registered capabilities. Each registration gets a
//! fresh [`HandlerId`], so registering an equivalent capability again after
//! deregistration yields a brand-new handler.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::capability::Capability;
use crate::identifiers::HandlerId;

// ============================================================================
// HandlerRegistry
// ============================================================================

/// Registered capabilities by ID.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<HandlerId, Arc<dyn Capability>>,
}

impl HandlerRegistry {
    /// Registers a capability under a fresh ID.
    pub fn insert(&mut self, capability: Arc<dyn Capability>) -> HandlerId {
        let id = HandlerId::next();
        self.handlers.insert(id, capability);
        id
    }

    /// Removes a handler, returning its capability if it was registered.
    pub fn remove(&mut self, id: HandlerId) -> Option<Arc<dyn Capability>> {
        self.handlers.remove(&id)
    }

    /// Returns `true` if the handler is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Iterates over registered handlers.
    pub fn iter(&self) -> impl Iterator<Item = (HandlerId, &Arc<dyn Capability>)> {
        self.handlers.iter().map(|(id, capability)| (*id, capability))
    }

    /// Returns the IDs of registered handlers.
    #[must_use]
    pub fn ids(&self) -> Vec<HandlerId> {
        self.handlers.keys().copied().collect()
    }

    /// Removes every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Returns the number of registered handlers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(id, c)| (id, c.name())))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::capability::capability_fn;
    use crate::disposable::Disposable;

    #[test]
    fn test_reregistration_gets_new_identity() {
        let capability = capability_fn("live-log", |_, _| Ok(Disposable::empty()));
        let mut registry = HandlerRegistry::default();

        let first = registry.insert(Arc::clone(&capability));
        assert!(registry.remove(first).is_some());
        let second = registry.insert(capability);

        assert_ne!(first, second);
        assert!(!registry.contains(first));
        assert!(registry.contains(second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_debug_lists_names() {
        let mut registry = HandlerRegistry::default();
        registry.insert(capability_fn("steps", |_, _| Ok(Disposable::empty())));
        assert!(format!("{registry:?}").contains("steps"));
    }
}
