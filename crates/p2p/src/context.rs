use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::config::P2pConfig;
use crate::events::{Diagnostic, DiagnosticKind, EventSink, NetworkEvent};
use crate::identity::LocalIdentity;
use crate::reachability::ReachabilityManager;
use crate::registry::PeerRegistry;

/// State shared by the listener, the dispatcher and the sender.
pub(crate) struct Shared {
    pub(crate) config: P2pConfig,
    pub(crate) identity: Arc<LocalIdentity>,
    pub(crate) registry: PeerRegistry,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) reachability: Option<Arc<ReachabilityManager>>,
    bound_port: AtomicU16,
}

impl Shared {
    pub(crate) fn new(
        config: P2pConfig,
        identity: Arc<LocalIdentity>,
        registry: PeerRegistry,
        events: Arc<dyn EventSink>,
        reachability: Option<Arc<ReachabilityManager>>,
    ) -> Self {
        let bound_port = AtomicU16::new(config.listen_port);
        Self {
            config,
            identity,
            registry,
            events,
            reachability,
            bound_port,
        }
    }

    pub(crate) fn set_bound_port(&self, port: u16) {
        self.bound_port.store(port, Ordering::Release);
    }

    /// Port put in Connect envelopes: the gateway port while a mapping is
    /// active, the locally bound port otherwise.
    pub(crate) fn advertised_port(&self) -> u16 {
        self.reachability
            .as_ref()
            .and_then(|manager| manager.external_port())
            .unwrap_or_else(|| self.bound_port.load(Ordering::Acquire))
    }

    pub(crate) fn publish(&self, event: NetworkEvent) {
        self.events.publish(event);
    }

    pub(crate) fn report(
        &self,
        kind: DiagnosticKind,
        detail: impl fmt::Display,
        remote: Option<SocketAddr>,
    ) {
        self.publish(NetworkEvent::Diagnostic(Diagnostic::new(kind, detail, remote)));
    }
}
