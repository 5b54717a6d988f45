use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::P2pConfig;
use crate::context::Shared;
use crate::dispatcher::Dispatcher;
use crate::error::NetworkError;
use crate::events::EventSink;
use crate::identity::LocalIdentity;
use crate::listener::{Listener, ListenerState, StopMode};
use crate::reachability::ReachabilityManager;
use crate::registry::PeerRegistry;
use crate::sender::{BroadcastReport, Presence, Sender};
use crate::types::PeerRecord;

/// Entry point for the host: one listener, one sender, one registry.
#[derive(Clone)]
pub struct NetworkHandle {
    shared: Arc<Shared>,
    listener: Arc<Listener>,
    sender: Sender,
    dispatcher: Dispatcher,
}

impl NetworkHandle {
    pub fn new(
        config: P2pConfig,
        identity: Arc<LocalIdentity>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::build(config, identity, events, None)
    }

    /// Like [`NetworkHandle::new`], with gateway port mapping performed on the
    /// first `start`.
    pub fn with_reachability(
        config: P2pConfig,
        identity: Arc<LocalIdentity>,
        events: Arc<dyn EventSink>,
        reachability: Arc<ReachabilityManager>,
    ) -> Self {
        Self::build(config, identity, events, Some(reachability))
    }

    fn build(
        config: P2pConfig,
        identity: Arc<LocalIdentity>,
        events: Arc<dyn EventSink>,
        reachability: Option<Arc<ReachabilityManager>>,
    ) -> Self {
        let shared = Arc::new(Shared::new(
            config,
            identity,
            PeerRegistry::new(),
            events,
            reachability,
        ));
        let sender = Sender::new(Arc::clone(&shared));
        let dispatcher = Dispatcher::new(Arc::clone(&shared));
        let listener = Arc::new(Listener::new(
            Arc::clone(&shared),
            dispatcher.clone(),
            sender.clone(),
        ));
        Self {
            shared,
            listener,
            sender,
            dispatcher,
        }
    }

    pub async fn start(&self) -> Result<(), NetworkError> {
        self.listener.start().await
    }

    pub async fn stop(&self, mode: StopMode) {
        self.listener.stop(mode).await
    }

    /// Stop for good: synchronous LogOff, end port rotation, release any
    /// gateway mapping and forget every peer.
    pub async fn shutdown(&self) {
        self.listener.stop(StopMode::Exiting).await;
        self.listener.stop_rotation().await;
        if let Some(manager) = &self.shared.reachability {
            if let Err(err) = manager.teardown().await {
                warn!(error = ?err, "failed to release gateway mapping");
            }
        }
        let forgotten = self.shared.registry.len();
        self.shared.registry.clear();
        info!(forgotten, "network shut down");
    }

    pub fn state(&self) -> ListenerState {
        self.listener.state()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().await
    }

    pub fn advertised_port(&self) -> u16 {
        self.shared.advertised_port()
    }

    pub fn identity(&self) -> &Arc<LocalIdentity> {
        &self.shared.identity
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.shared.registry
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.shared.registry.snapshot()
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &P2pConfig {
        &self.shared.config
    }

    pub async fn send_message(&self, text: &str) -> BroadcastReport {
        self.sender.send_message(text).await
    }

    pub async fn change_nick(&self, nickname: impl Into<String>) -> BroadcastReport {
        self.sender.change_nick(nickname).await
    }

    pub async fn connect_to_remote(&self, address: &str) -> Result<(), NetworkError> {
        self.sender.connect_to_remote(address).await
    }

    pub async fn log_off(&self) -> BroadcastReport {
        self.sender.send_presence(Presence::LogOff).await
    }
}

/// Build a handle and start listening right away.
pub async fn start_network(
    config: P2pConfig,
    identity: Arc<LocalIdentity>,
    events: Arc<dyn EventSink>,
) -> Result<NetworkHandle, NetworkError> {
    let handle = NetworkHandle::new(config, identity, events);
    handle.start().await?;
    Ok(handle)
}
