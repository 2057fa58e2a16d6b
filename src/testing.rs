//! Shared test fixtures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use crate::capability::{Capability, capability_fn};
use crate::disposable::Disposable;
use crate::error::{Error, Result};
use crate::options::ChannelOptions;
use crate::transport::{Channel, Connector, memory_pair};

/// Installs a test subscriber once; honours `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counts installs and releases of one capability.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    installs: AtomicUsize,
    releases: AtomicUsize,
}

impl Tally {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Installs minus releases.
    pub(crate) fn live(&self) -> usize {
        self.installs() - self.releases()
    }
}

/// A capability that installs one notification listener per channel and
/// records every install and release in `tally`.
pub(crate) fn tally_capability(name: &str, tally: &Arc<Tally>) -> Arc<dyn Capability> {
    let tally = Arc::clone(tally);
    let method = format!("{name}.event");
    capability_fn(name, move |channel, _closed| {
        tally.installs.fetch_add(1, Ordering::SeqCst);
        let listener = channel.on_notification(method.clone(), |_| {});
        let tally = Arc::clone(&tally);
        Ok(Disposable::combine([
            listener,
            Disposable::new(move || {
                tally.releases.fetch_add(1, Ordering::SeqCst);
            }),
        ]))
    })
}

/// In-process [`Connector`] that records every dial.
///
/// Each successful dial keeps the listening server end so tests can drive it.
#[derive(Default)]
pub(crate) struct FakeConnector {
    calls: AtomicUsize,
    refusals: AtomicUsize,
    gate: Option<Arc<Notify>>,
    peers: Mutex<Vec<(u16, Channel)>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuses the first `count` dials with `PeerNotReady`.
    pub(crate) fn refusing(count: usize) -> Arc<Self> {
        Arc::new(Self {
            refusals: AtomicUsize::new(count),
            ..Self::default()
        })
    }

    /// Holds every dial until `gate` is notified.
    pub(crate) fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Server end of the most recent dial to `port`.
    pub(crate) fn peer(&self, port: u16) -> Option<Channel> {
        self.peers
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| *p == port)
            .map(|(_, channel)| channel.clone())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Channel> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::peer_not_ready(host, port));
        }

        let (server, client) = memory_pair(ChannelOptions::default()).await;
        server.start_listening();
        self.peers.lock().push((port, server));
        Ok(client)
    }
}
