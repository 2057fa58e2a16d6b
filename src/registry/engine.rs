//! Pairing engine.
//!
//! Keeps every open connection paired with every registered handler:
//!
//! | Event | Effect |
//! |-------|--------|
//! | connection admitted | install every handler on it |
//! | handler registered | install it on every connection |
//! | connection closed | release the connection's pairings |
//! | handler deregistered | release the handler's pairings |
//!
//! All registry and ledger mutation happens under one lock, so crossing
//! events produce exactly one pairing per (connection, handler). Capability
//! code never runs under that lock: installs run after a slot is reserved,
//! releases run after the pairing has left the ledger. Re-entrant calls from
//! inside a capability therefore see already-updated state and cannot release
//! a pairing twice.
//!
//! A capability that panics during install is treated like one that returned
//! an error: only that pair is abandoned.
//!
//! After [`PairingEngine::shutdown`] the engine admits nothing: late channels
//! are shut down and late handlers are never installed.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::capability::Capability;
use crate::disposable::Disposable;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, HandlerId, PairingId};
use crate::transport::Channel;

use super::connections::ConnectionRegistry;
use super::handlers::HandlerRegistry;
use super::ledger::Ledger;

// ============================================================================
// Types
// ============================================================================

/// A live (connection, handler) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pairing {
    /// Handle for [`PairingEngine::release`].
    pub id: PairingId,
    /// The paired connection.
    pub connection: ConnectionId,
    /// The paired handler.
    pub handler: HandlerId,
}

/// A reserved pairing waiting for its capability to run.
struct Install {
    pairing: PairingId,
    connection: ConnectionId,
    handler: HandlerId,
    capability: Arc<dyn Capability>,
    channel: Channel,
}

#[derive(Default)]
struct EngineState {
    connections: ConnectionRegistry,
    handlers: HandlerRegistry,
    ledger: Ledger,
    /// Set by shutdown; nothing is admitted or registered afterwards.
    closed: bool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<EngineState>,
}

// ============================================================================
// PairingEngine
// ============================================================================

/// Pairs connections with handlers.
///
/// Cloning is cheap; clones share the same registries.
///
/// # Example
///
/// ```ignore
/// let engine = PairingEngine::new();
/// let registration = engine.register(capability_fn("live-log", install_live_log));
///
/// tokio::spawn({
///     let engine = engine.clone();
///     async move { engine.serve(channel).await }
/// });
///
/// // Later: releases the capability on every connection.
/// registration.deregister();
/// ```
#[derive(Clone, Default)]
pub struct PairingEngine {
    inner: Arc<Inner>,
}

impl PairingEngine {
    /// Creates an engine with no connections and no handlers.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// PairingEngine - Connections
// ============================================================================

impl PairingEngine {
    /// Admits a channel and pairs it with every registered handler.
    ///
    /// Starts listening on the channel once the initial pairings are wired.
    /// The connection stays admitted until [`close`](Self::close).
    ///
    /// After [`shutdown`](Self::shutdown) the channel is shut down instead
    /// and the returned ID names no connection.
    pub fn admit(&self, channel: Channel) -> ConnectionId {
        let (id, installs) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            if state.closed {
                drop(guard);
                debug!("Engine shut down, refusing connection");
                channel.shutdown();
                return ConnectionId::next();
            }

            let id = state.connections.insert(channel.clone());
            let installs: Vec<_> = state
                .handlers
                .iter()
                .filter_map(|(handler, capability)| {
                    let pairing = state.ledger.reserve(id, handler)?;
                    Some(Install {
                        pairing,
                        connection: id,
                        handler,
                        capability: Arc::clone(capability),
                        channel: channel.clone(),
                    })
                })
                .collect();

            (id, installs)
        };

        debug!(connection = %id, handlers = installs.len(), "Connection admitted");

        self.run_installs(installs);
        channel.start_listening();

        id
    }

    /// Admits a channel and keeps it admitted until it closes.
    ///
    /// Returns the connection ID after all of its pairings were released.
    pub async fn serve(&self, channel: Channel) -> ConnectionId {
        let closed = channel.closed();
        let id = self.admit(channel);

        closed.wait().await;
        self.close(id);

        id
    }

    /// Removes a connection and releases all of its pairings.
    ///
    /// Handler membership is untouched. Returns `false` if the connection was
    /// not open.
    pub fn close(&self, id: ConnectionId) -> bool {
        let released = {
            let mut state = self.inner.state.lock();
            if state.connections.remove(id).is_none() {
                return false;
            }
            state.ledger.remove_connection(id)
        };

        debug!(connection = %id, released = released.len(), "Connection closed");
        Self::release_all(released);

        true
    }
}

// ============================================================================
// PairingEngine - Handlers
// ============================================================================

impl PairingEngine {
    /// Registers a capability and pairs it with every open connection.
    ///
    /// After [`shutdown`](Self::shutdown) nothing is registered and the
    /// returned [`Deregistration`] is inert.
    pub fn register(&self, capability: Arc<dyn Capability>) -> Deregistration {
        let name = capability.name().to_string();

        let (id, installs) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            if state.closed {
                debug!(%name, "Engine shut down, handler not registered");
                return Deregistration {
                    engine: Weak::new(),
                    handler: HandlerId::next(),
                };
            }

            let id = state.handlers.insert(Arc::clone(&capability));
            let installs: Vec<_> = state
                .connections
                .iter()
                .filter_map(|(connection, channel)| {
                    let pairing = state.ledger.reserve(connection, id)?;
                    Some(Install {
                        pairing,
                        connection,
                        handler: id,
                        capability: Arc::clone(&capability),
                        channel: channel.clone(),
                    })
                })
                .collect();

            (id, installs)
        };

        debug!(handler = %id, %name, connections = installs.len(), "Handler registered");

        self.run_installs(installs);

        Deregistration {
            engine: Arc::downgrade(&self.inner),
            handler: id,
        }
    }

    /// Removes a handler and releases its pairings on every connection.
    ///
    /// No connection is closed. Returns `false` if the handler was not
    /// registered.
    pub fn deregister(&self, id: HandlerId) -> bool {
        let released = {
            let mut state = self.inner.state.lock();
            if state.handlers.remove(id).is_none() {
                return false;
            }
            state.ledger.remove_handler(id)
        };

        debug!(handler = %id, released = released.len(), "Handler deregistered");
        Self::release_all(released);

        true
    }
}

// ============================================================================
// PairingEngine - Pairings
// ============================================================================

impl PairingEngine {
    /// Releases a single pairing by handle.
    ///
    /// Returns `false` if the pairing is not live, e.g. because it was
    /// already released through its connection or handler.
    pub fn release(&self, id: PairingId) -> bool {
        let resource = self.inner.state.lock().ledger.remove(id);

        match resource {
            Some(resource) => {
                trace!(pairing = %id, "Pairing released");
                resource.dispose();
                true
            }
            None => false,
        }
    }

    /// Closes every connection and drops every handler.
    ///
    /// Channels are shut down after their pairings were released. The engine
    /// stays usable.
    pub fn clear(&self) {
        self.drain(false);
    }

    /// Clears the engine and refuses every later admit and register.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.drain(true);
    }

    fn drain(&self, shutdown: bool) {
        let (channels, released) = {
            let mut state = self.inner.state.lock();
            state.closed |= shutdown;
            let channels = state.connections.drain();
            state.handlers.clear();
            (channels, state.ledger.drain())
        };

        debug!(
            connections = channels.len(),
            released = released.len(),
            "Pairing engine cleared"
        );

        Self::release_all(released);
        for (_, channel) in channels {
            channel.shutdown();
        }
    }

    /// Runs reserved installs outside the lock and commits their results.
    fn run_installs(&self, installs: Vec<Install>) {
        for install in installs {
            let Install {
                pairing,
                connection,
                handler,
                capability,
                channel,
            } = install;

            match Self::install(capability.as_ref(), &channel) {
                Ok(resource) => {
                    let committed = self.inner.state.lock().ledger.commit(pairing, resource);

                    match committed {
                        Ok(()) => {
                            trace!(%pairing, %connection, %handler, "Pairing installed");
                        }
                        Err(resource) => {
                            // Connection or handler went away during install.
                            debug!(%pairing, %connection, %handler, "Pairing withdrawn during install");
                            resource.dispose();
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        %connection,
                        %handler,
                        capability = capability.name(),
                        error = %e,
                        "Handler installation failed, pair abandoned"
                    );
                    // Installing slots never hold a resource.
                    let removed = self.inner.state.lock().ledger.remove(pairing);
                    debug_assert!(removed.is_none(), "abandoned pairing held a resource");
                }
            }
        }
    }

    /// Runs one install, turning a panic into an installation error.
    fn install(capability: &dyn Capability, channel: &Channel) -> Result<Disposable> {
        panic::catch_unwind(AssertUnwindSafe(|| {
            capability.install(channel, channel.closed())
        }))
        .unwrap_or_else(|payload| {
            Err(Error::handler_installation(
                capability.name(),
                panic_message(payload.as_ref()),
            ))
        })
    }

    fn release_all(released: Vec<Disposable>) {
        for resource in released {
            resource.dispose();
        }
    }
}

// ============================================================================
// PairingEngine - Queries
// ============================================================================

impl PairingEngine {
    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns the number of open connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Returns the number of registered handlers.
    #[inline]
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.inner.state.lock().handlers.len()
    }

    /// Returns the number of live pairings.
    #[inline]
    #[must_use]
    pub fn pairing_count(&self) -> usize {
        self.inner.state.lock().ledger.live_pairs().len()
    }

    /// Returns `true` if the connection is open.
    #[inline]
    #[must_use]
    pub fn has_connection(&self, id: ConnectionId) -> bool {
        self.inner.state.lock().connections.contains(id)
    }

    /// Returns `true` if the handler is registered.
    #[inline]
    #[must_use]
    pub fn has_handler(&self, id: HandlerId) -> bool {
        self.inner.state.lock().handlers.contains(id)
    }

    /// Returns the channel of an open connection.
    #[must_use]
    pub fn channel(&self, id: ConnectionId) -> Option<Channel> {
        self.inner.state.lock().connections.get(id).cloned()
    }

    /// Returns the IDs of open connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.state.lock().connections.ids()
    }

    /// Returns the IDs of registered handlers.
    #[must_use]
    pub fn handler_ids(&self) -> Vec<HandlerId> {
        self.inner.state.lock().handlers.ids()
    }

    /// Returns `true` if the pair has a live pairing.
    #[must_use]
    pub fn is_paired(&self, connection: ConnectionId, handler: HandlerId) -> bool {
        self.inner.state.lock().ledger.is_live(connection, handler)
    }

    /// Returns every live pairing.
    #[must_use]
    pub fn pairings(&self) -> Vec<Pairing> {
        self.inner
            .state
            .lock()
            .ledger
            .live_pairs()
            .into_iter()
            .map(|(id, connection, handler)| Pairing {
                id,
                connection,
                handler,
            })
            .collect()
    }
}

impl fmt::Debug for PairingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PairingEngine")
            .field("connections", &state.connections.len())
            .field("handlers", &state.handlers)
            .field("pairings", &state.ledger.len())
            .field("closed", &state.closed)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

// ============================================================================
// Deregistration
// ============================================================================

/// Withdraws a registered handler.
///
/// Dropping it leaves the handler registered.
#[must_use = "dropping a Deregistration leaves the handler registered"]
#[derive(Debug)]
pub struct Deregistration {
    engine: Weak<Inner>,
    handler: HandlerId,
}

impl Deregistration {
    /// Returns the ID of the registered handler.
    #[inline]
    #[must_use]
    pub fn handler_id(&self) -> HandlerId {
        self.handler
    }

    /// Removes the handler and releases every pairing it produced.
    ///
    /// Returns after all releases completed. Returns `false` if the handler
    /// was already gone or the engine was dropped.
    pub fn deregister(self) -> bool {
        match self.engine.upgrade() {
            Some(inner) => PairingEngine { inner }.deregister(self.handler),
            None => false,
        }
    }
}

impl From<Deregistration> for Disposable {
    fn from(registration: Deregistration) -> Self {
        Disposable::new(move || {
            registration.deregister();
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio::sync::Barrier;

    use crate::capability::capability_fn;
    use crate::options::ChannelOptions;
    use crate::testing::{Tally, init_tracing, tally_capability};
    use crate::transport::memory_pair;

    async fn channel() -> (Channel, Channel) {
        memory_pair(ChannelOptions::default()).await
    }

    #[tokio::test]
    async fn test_scenario_handler_registered_after_connection() {
        init_tracing();
        let engine = PairingEngine::new();
        let tally = Tally::new();

        let (a, _peer_a) = channel().await;
        let conn_a = engine.admit(a.clone());
        assert_eq!(engine.pairing_count(), 0);

        let registration = engine.register(tally_capability("h1", &tally));
        let h1 = registration.handler_id();
        assert!(engine.is_paired(conn_a, h1));
        assert_eq!(engine.pairing_count(), 1);

        let (b, _peer_b) = channel().await;
        let conn_b = engine.admit(b.clone());
        assert!(engine.is_paired(conn_b, h1));
        assert_eq!(engine.pairing_count(), 2);
        assert_eq!(tally.live(), 2);

        assert!(registration.deregister());
        assert_eq!(engine.pairing_count(), 0);
        assert_eq!(tally.releases(), 2);
        assert_eq!(a.listener_count(), 0);
        assert_eq!(b.listener_count(), 0);

        assert!(engine.close(conn_a));
        assert_eq!(tally.releases(), 2);
        assert_eq!(engine.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_admit_starts_listening_after_pairing() {
        let engine = PairingEngine::new();
        let (a, _peer) = channel().await;

        let seen_listening = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_listening);
        let _registration = engine.register(capability_fn("check", move |channel, _| {
            *seen.lock() = Some(channel.is_listening());
            Ok(Disposable::empty())
        }));

        engine.admit(a.clone());
        assert_eq!(*seen_listening.lock(), Some(false));
        assert!(a.is_listening());
    }

    #[tokio::test]
    async fn test_close_releases_only_that_connection() {
        let engine = PairingEngine::new();
        let (p1, p2) = (Tally::new(), Tally::new());
        let _r1 = engine.register(tally_capability("h1", &p1));
        let _r2 = engine.register(tally_capability("h2", &p2));

        let (a, _peer_a) = channel().await;
        let (b, _peer_b) = channel().await;
        let conn_a = engine.admit(a.clone());
        let conn_b = engine.admit(b.clone());
        assert_eq!(engine.pairing_count(), 4);

        assert!(engine.close(conn_a));
        assert_eq!(engine.pairing_count(), 2);
        assert_eq!(engine.handler_count(), 2);
        assert_eq!(p1.releases(), 1);
        assert_eq!(p2.releases(), 1);
        assert_eq!(a.listener_count(), 0);
        assert_eq!(b.listener_count(), 2);
        assert!(engine.pairings().iter().all(|p| p.connection == conn_b));

        // Closing again has no effect.
        assert!(!engine.close(conn_a));
        assert_eq!(p1.releases(), 1);
    }

    #[tokio::test]
    async fn test_deregister_releases_only_that_handler() {
        let engine = PairingEngine::new();
        let (p1, p2) = (Tally::new(), Tally::new());
        let r1 = engine.register(tally_capability("h1", &p1));
        let r2 = engine.register(tally_capability("h2", &p2));
        let h2 = r2.handler_id();

        let (a, _peer_a) = channel().await;
        let (b, _peer_b) = channel().await;
        engine.admit(a.clone());
        engine.admit(b.clone());

        assert!(r1.deregister());
        assert_eq!(p1.releases(), 2);
        assert_eq!(p2.releases(), 0);
        assert_eq!(engine.connection_count(), 2);
        assert!(engine.pairings().iter().all(|p| p.handler == h2));
        assert!(!a.is_closed());
        assert!(!b.is_closed());

        assert!(engine.deregister(h2));
        assert!(!engine.deregister(h2));
        assert_eq!(p2.releases(), 2);
    }

    #[tokio::test]
    async fn test_reentrant_deregistration_from_release_callback() {
        let engine = PairingEngine::new();
        let releases = Arc::new(Mutex::new(0));
        let own_id: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let capability = {
            let engine = engine.clone();
            let releases = Arc::clone(&releases);
            let own_id = Arc::clone(&own_id);
            capability_fn("self-removing", move |_, _| {
                let engine = engine.clone();
                let releases = Arc::clone(&releases);
                let own_id = Arc::clone(&own_id);
                Ok(Disposable::new(move || {
                    *releases.lock() += 1;
                    let id = *own_id.lock();
                    if let Some(id) = id {
                        engine.deregister(id);
                    }
                }))
            })
        };

        let registration = engine.register(capability);
        *own_id.lock() = Some(registration.handler_id());

        let (a, _peer_a) = channel().await;
        let (b, _peer_b) = channel().await;
        let conn_a = engine.admit(a);
        engine.admit(b);
        assert_eq!(engine.pairing_count(), 2);

        // Closing A releases (A, h), whose callback deregisters h, which
        // releases (B, h) only.
        assert!(engine.close(conn_a));
        assert_eq!(*releases.lock(), 2);
        assert_eq!(engine.handler_count(), 0);
        assert_eq!(engine.pairing_count(), 0);

        assert!(!registration.deregister());
        assert_eq!(*releases.lock(), 2);
    }

    #[tokio::test]
    async fn test_release_by_handle_is_idempotent() {
        let engine = PairingEngine::new();
        let tally = Tally::new();
        let _registration = engine.register(tally_capability("h", &tally));
        let (a, _peer) = channel().await;
        let conn = engine.admit(a);

        let pairing = engine.pairings()[0];
        assert_eq!(pairing.connection, conn);
        assert!(engine.release(pairing.id));
        assert!(!engine.release(pairing.id));
        assert_eq!(tally.releases(), 1);

        assert!(engine.close(conn));
        assert_eq!(tally.releases(), 1);
    }

    #[tokio::test]
    async fn test_install_failure_abandons_only_that_pair() {
        let engine = PairingEngine::new();
        let tally = Tally::new();
        let _good = engine.register(tally_capability("good", &tally));
        let bad = engine.register(capability_fn("bad", |_, _| {
            Err(Error::handler_installation("bad", "peer too old"))
        }));

        let (a, _peer) = channel().await;
        let conn = engine.admit(a);

        assert_eq!(engine.pairing_count(), 1);
        assert!(!engine.is_paired(conn, bad.handler_id()));
        assert!(engine.has_handler(bad.handler_id()));
        assert_eq!(tally.live(), 1);
    }

    #[tokio::test]
    async fn test_connection_closed_during_install_releases_once() {
        let engine = PairingEngine::new();
        let releases = Arc::new(Mutex::new(0));
        let target: Arc<Mutex<Option<ConnectionId>>> = Arc::new(Mutex::new(None));

        let (a, _peer) = channel().await;
        let conn = engine.admit(a);
        *target.lock() = Some(conn);

        let capability = {
            let engine = engine.clone();
            let releases = Arc::clone(&releases);
            let target = Arc::clone(&target);
            capability_fn("closer", move |_, _| {
                if let Some(id) = *target.lock() {
                    engine.close(id);
                }
                let releases = Arc::clone(&releases);
                Ok(Disposable::new(move || *releases.lock() += 1))
            })
        };

        let registration = engine.register(capability);
        assert_eq!(*releases.lock(), 1);
        assert_eq!(engine.pairing_count(), 0);
        assert!(!engine.has_connection(conn));

        assert!(registration.deregister());
        assert_eq!(*releases.lock(), 1);
    }

    #[tokio::test]
    async fn test_register_from_inside_install_pairs_once() {
        let engine = PairingEngine::new();
        let inner_tally = Tally::new();
        let nested: Arc<Mutex<Vec<Deregistration>>> = Arc::new(Mutex::new(Vec::new()));

        let (a, _peer) = channel().await;
        let conn = engine.admit(a.clone());

        let outer = {
            let engine = engine.clone();
            let inner_tally = Arc::clone(&inner_tally);
            let nested = Arc::clone(&nested);
            capability_fn("outer", move |_, _| {
                let registration = engine.register(tally_capability("inner", &inner_tally));
                nested.lock().push(registration);
                Ok(Disposable::empty())
            })
        };

        let _outer = engine.register(outer);
        assert_eq!(inner_tally.installs(), 1);
        assert_eq!(engine.pairing_count(), 2);
        assert_eq!(a.listener_count(), 1);

        let inner_id = nested.lock()[0].handler_id();
        assert!(engine.is_paired(conn, inner_id));
    }

    #[tokio::test]
    async fn test_serve_releases_when_channel_closes() {
        let engine = PairingEngine::new();
        let tally = Tally::new();
        let _registration = engine.register(tally_capability("h", &tally));

        let (a, peer) = channel().await;
        let served = tokio::spawn({
            let engine = engine.clone();
            async move { engine.serve(a).await }
        });

        while engine.pairing_count() == 0 {
            tokio::task::yield_now().await;
        }
        peer.shutdown();

        let id = served.await.expect("join");
        assert!(!engine.has_connection(id));
        assert_eq!(tally.live(), 0);
        assert_eq!(engine.handler_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_releases_everything() {
        let engine = PairingEngine::new();
        let tally = Tally::new();
        let registration = engine.register(tally_capability("h", &tally));
        let (a, _peer) = channel().await;
        engine.admit(a.clone());

        engine.clear();
        assert_eq!(engine.connection_count(), 0);
        assert_eq!(engine.handler_count(), 0);
        assert_eq!(tally.live(), 0);

        a.closed().wait().await;
        assert!(!registration.deregister());
    }

    #[tokio::test]
    async fn test_deregistration_after_engine_dropped() {
        let engine = PairingEngine::new();
        let registration = engine.register(capability_fn("h", |_, _| Ok(Disposable::empty())));
        drop(engine);
        assert!(!registration.deregister());
    }

    #[tokio::test]
    async fn test_deregistration_as_disposable() {
        let engine = PairingEngine::new();
        let tally = Tally::new();
        let (a, _peer) = channel().await;
        engine.admit(a);

        let disposable: Disposable = engine.register(tally_capability("h", &tally)).into();
        assert_eq!(tally.live(), 1);
        disposable.dispose();
        assert_eq!(engine.handler_count(), 0);
        assert_eq!(tally.live(), 0);
    }

    // ------------------------------------------------------------------------
    // Event sequences
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_install_panic_abandons_only_that_pair() {
        init_tracing();
        let engine = PairingEngine::new();
        let (a, _peer_a) = channel().await;
        let (b, _peer_b) = channel().await;
        let conn_a = engine.admit(a);
        let conn_b = engine.admit(b);

        let panicked = Arc::new(AtomicBool::new(false));
        let capability = {
            let panicked = Arc::clone(&panicked);
            capability_fn("flaky", move |_, _| {
                if !panicked.swap(true, Ordering::SeqCst) {
                    panic!("install blew up");
                }
                Ok(Disposable::empty())
            })
        };

        let registration = engine.register(capability);
        let handler = registration.handler_id();

        assert!(panicked.load(Ordering::SeqCst));
        assert!(engine.has_handler(handler));
        assert_eq!(engine.pairing_count(), 1);
        let paired = [conn_a, conn_b]
            .iter()
            .filter(|conn| engine.is_paired(**conn, handler))
            .count();
        assert_eq!(paired, 1);

        // The abandoned slot left the ledger.
        assert!(format!("{engine:?}").contains("pairings: 1"));
        assert!(registration.deregister());
        assert!(format!("{engine:?}").contains("pairings: 0"));

        let tally = Tally::new();
        let _later = engine.register(tally_capability("later", &tally));
        assert_eq!(tally.live(), 2);
    }

    #[test]
    fn test_panic_message_payloads() {
        assert_eq!(panic_message(&"boom"), "panicked: boom");
        assert_eq!(panic_message(&String::from("boom")), "panicked: boom");
        assert_eq!(panic_message(&42_u32), "panicked");
    }

    #[tokio::test]
    async fn test_shutdown_refuses_late_admit_and_register() {
        let engine = PairingEngine::new();
        let tally = Tally::new();
        let registration = engine.register(tally_capability("h", &tally));
        let (a, _peer_a) = channel().await;
        engine.admit(a);
        assert_eq!(tally.live(), 1);

        engine.shutdown();
        assert!(engine.is_shutdown());
        assert_eq!(tally.live(), 0);
        assert!(!registration.deregister());

        let (late, _peer) = channel().await;
        let served = tokio::time::timeout(Duration::from_secs(5), engine.serve(late.clone()))
            .await
            .expect("serve returns once the late channel is shut down");
        assert!(!engine.has_connection(served));
        assert!(late.is_closed());
        assert_eq!(engine.connection_count(), 0);

        let late_tally = Tally::new();
        let late_registration = engine.register(tally_capability("late", &late_tally));
        assert_eq!(engine.handler_count(), 0);
        assert_eq!(late_tally.installs(), 0);
        assert!(!late_registration.deregister());

        engine.shutdown();
        assert!(engine.is_shutdown());
    }

    #[tokio::test]
    async fn test_clear_keeps_engine_usable() {
        let engine = PairingEngine::new();
        engine.clear();
        assert!(!engine.is_shutdown());

        let tally = Tally::new();
        let _registration = engine.register(tally_capability("h", &tally));
        let (a, _peer) = channel().await;
        let conn = engine.admit(a);
        assert!(engine.has_connection(conn));
        assert_eq!(tally.live(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_crossing_pairs_exactly_once() {
        const SIDE: usize = 6;

        for _round in 0..20 {
            let engine = PairingEngine::new();
            let mut channels = Vec::with_capacity(SIDE);
            let mut peers = Vec::with_capacity(SIDE);
            for _ in 0..SIDE {
                let (channel, peer) = channel().await;
                channels.push(channel);
                peers.push(peer);
            }
            let tallies: Vec<_> = (0..SIDE).map(|_| Tally::new()).collect();

            // Admits and registers released together.
            let barrier = Arc::new(Barrier::new(2 * SIDE));
            let admits: Vec<_> = channels
                .iter()
                .cloned()
                .map(|channel| {
                    let engine = engine.clone();
                    let barrier = Arc::clone(&barrier);
                    tokio::spawn(async move {
                        barrier.wait().await;
                        engine.admit(channel)
                    })
                })
                .collect();
            let registers: Vec<_> = tallies
                .iter()
                .map(|tally| {
                    let engine = engine.clone();
                    let barrier = Arc::clone(&barrier);
                    let capability = tally_capability("h", tally);
                    tokio::spawn(async move {
                        barrier.wait().await;
                        engine.register(capability)
                    })
                })
                .collect();

            let mut connections = Vec::with_capacity(SIDE);
            for admit in admits {
                connections.push(admit.await.expect("admit task"));
            }
            let mut registrations = Vec::with_capacity(SIDE);
            for register in registers {
                registrations.push(register.await.expect("register task"));
            }

            let expected: HashSet<(ConnectionId, HandlerId)> = connections
                .iter()
                .flat_map(|c| registrations.iter().map(move |r| (*c, r.handler_id())))
                .collect();
            let actual: HashSet<(ConnectionId, HandlerId)> = engine
                .pairings()
                .into_iter()
                .map(|p| (p.connection, p.handler))
                .collect();
            assert_eq!(actual, expected);
            assert_eq!(engine.pairing_count(), SIDE * SIDE);
            for tally in &tallies {
                assert_eq!(tally.installs(), SIDE);
                assert_eq!(tally.live(), SIDE);
            }
            for channel in &channels {
                assert_eq!(channel.listener_count(), SIDE);
            }

            // Closes, deregisters and a late register cross as well.
            let late = Tally::new();
            let barrier = Arc::new(Barrier::new(2 * SIDE + 1));
            let mut removals = Vec::with_capacity(2 * SIDE + 1);
            for connection in connections {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                removals.push(tokio::spawn(async move {
                    barrier.wait().await;
                    assert!(engine.close(connection));
                }));
            }
            for registration in registrations {
                let barrier = Arc::clone(&barrier);
                removals.push(tokio::spawn(async move {
                    barrier.wait().await;
                    assert!(registration.deregister());
                }));
            }
            {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                let capability = tally_capability("late", &late);
                removals.push(tokio::spawn(async move {
                    barrier.wait().await;
                    // Stays registered; only its pairings must drain.
                    let _ = engine.register(capability);
                }));
            }
            for removal in removals {
                removal.await.expect("removal task");
            }

            assert_eq!(engine.connection_count(), 0);
            assert_eq!(engine.pairing_count(), 0);
            assert!(format!("{engine:?}").contains("pairings: 0"));
            for tally in &tallies {
                assert_eq!(tally.releases(), SIDE);
            }
            assert!(late.installs() <= SIDE);
            assert_eq!(late.live(), 0);
            for channel in &channels {
                assert_eq!(channel.listener_count(), 0);
            }
        }
    }

    #[derive(Debug, Clone)]
    enum Event {
        Admit,
        Close(usize),
        Register,
        Deregister(usize),
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            Just(Event::Admit),
            any::<usize>().prop_map(Event::Close),
            Just(Event::Register),
            any::<usize>().prop_map(Event::Deregister),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_pairings_match_open_times_registered(events in prop::collection::vec(event(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            runtime.block_on(async move {
                let engine = PairingEngine::new();
                let mut open: Vec<(ConnectionId, Channel)> = Vec::new();
                let mut peers = Vec::new();
                let mut registered: Vec<(HandlerId, Arc<Tally>)> = Vec::new();
                let mut registrations: Vec<Deregistration> = Vec::new();

                for event in events {
                    match event {
                        Event::Admit => {
                            let (channel, peer) = memory_pair(ChannelOptions::default()).await;
                            peers.push(peer);
                            let id = engine.admit(channel.clone());
                            open.push((id, channel));
                        }
                        Event::Close(i) if !open.is_empty() => {
                            let (id, channel) = open.remove(i % open.len());
                            assert!(engine.close(id));
                            assert_eq!(channel.listener_count(), 0);
                        }
                        Event::Register => {
                            let tally = Tally::new();
                            let registration = engine.register(tally_capability("h", &tally));
                            registered.push((registration.handler_id(), tally));
                            registrations.push(registration);
                        }
                        Event::Deregister(i) if !registrations.is_empty() => {
                            let index = i % registrations.len();
                            let registration = registrations.remove(index);
                            let (_, tally) = registered.remove(index);
                            assert!(registration.deregister());
                            assert_eq!(tally.live(), 0);
                        }
                        _ => {}
                    }

                    let expected: HashSet<(ConnectionId, HandlerId)> = open
                        .iter()
                        .flat_map(|(c, _)| registered.iter().map(move |(h, _)| (*c, *h)))
                        .collect();
                    let actual: HashSet<(ConnectionId, HandlerId)> = engine
                        .pairings()
                        .into_iter()
                        .map(|p| (p.connection, p.handler))
                        .collect();

                    assert_eq!(actual, expected);
                    assert_eq!(engine.pairing_count(), expected.len());
                    for (_, tally) in &registered {
                        assert_eq!(tally.live(), open.len());
                    }
                    for (_, channel) in &open {
                        assert_eq!(channel.listener_count(), registered.len());
                    }
                }
            });
        }
    }
}
