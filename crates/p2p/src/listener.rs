use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::codec::read_envelope;
use crate::context::Shared;
use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::NetworkError;
use crate::events::DiagnosticKind;
use crate::reachability;
use crate::sender::{Presence, Sender};

const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

/// How `stop` delivers the LogOff broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    /// The process is about to exit: wait for every LogOff to be sent.
    Exiting,
    /// Keep running: send LogOff in the background.
    Background,
}

#[derive(Default)]
struct Lifecycle {
    started_once: bool,
    reachability_done: bool,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    rotation: Option<JoinHandle<()>>,
    log_off: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// Owns the listening socket and its accept loop.
pub struct Listener {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    sender: Sender,
    state: RwLock<ListenerState>,
    lifecycle: Mutex<Lifecycle>,
}

impl Listener {
    pub(crate) fn new(shared: Arc<Shared>, dispatcher: Dispatcher, sender: Sender) -> Self {
        Self {
            shared,
            dispatcher,
            sender,
            state: RwLock::new(ListenerState::Stopped),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.write() = state;
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().await.local_addr
    }

    /// Bind and start accepting. Does nothing when already listening.
    ///
    /// The first successful bind also asks the reachability manager, if any,
    /// for a gateway mapping onto the bound port; a failed mapping is
    /// reported and the listener carries on unmapped.
    ///
    /// After a previous `stop`, every peer still in the registry is sent a
    /// fresh Connect so it learns we are back.
    pub async fn start(&self) -> Result<(), NetworkError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(
            self.state(),
            ListenerState::Listening | ListenerState::Starting
        ) {
            return Ok(());
        }
        self.set_state(ListenerState::Starting);

        // A background LogOff must land before the re-announce, or peers
        // would drop us right after accepting our Connect.
        if let Some(log_off) = lifecycle.log_off.take() {
            if let Err(err) = log_off.await {
                warn!(error = ?err, "log-off broadcast ended abnormally");
            }
        }

        let addr = self.shared.config.listen_addr();
        let listener = match bind(addr, self.shared.config.backlog) {
            Ok(listener) => listener,
            Err(source) => {
                self.set_state(ListenerState::Stopped);
                error!(%addr, error = %source, "failed to bind listener");
                return Err(NetworkError::Bind { addr, source });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local) => local,
            Err(source) => {
                self.set_state(ListenerState::Stopped);
                return Err(NetworkError::Bind { addr, source });
            }
        };
        self.shared.set_bound_port(local_addr.port());
        if !lifecycle.reachability_done {
            lifecycle.rotation = self.setup_reachability(local_addr.port()).await;
            lifecycle.reachability_done = true;
        }
        info!(addr = %local_addr, advertised = self.shared.advertised_port(), "p2p listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            self.dispatcher.clone(),
            self.sender.clone(),
            Arc::clone(&self.shared),
        ));
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.accept_task = Some(task);
        lifecycle.local_addr = Some(local_addr);
        self.set_state(ListenerState::Listening);

        if lifecycle.started_once {
            let sender = self.sender.clone();
            tokio::spawn(async move {
                let report = sender.announce().await;
                debug!(
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "re-announced presence"
                );
            });
        }
        lifecycle.started_once = true;
        Ok(())
    }

    /// Announce LogOff, close the socket and end the accept loop. Peers stay
    /// registered. Connections already accepted finish on their own.
    pub async fn stop(&self, mode: StopMode) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() != ListenerState::Listening {
            return;
        }
        self.set_state(ListenerState::Stopping);

        match mode {
            StopMode::Exiting => {
                self.sender.send_presence(Presence::LogOff).await;
            }
            StopMode::Background => {
                let sender = self.sender.clone();
                lifecycle.log_off = Some(tokio::spawn(async move {
                    sender.send_presence(Presence::LogOff).await;
                }));
            }
        }

        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = lifecycle.accept_task.take() {
            if let Err(err) = task.await {
                warn!(error = ?err, "accept loop ended abnormally");
            }
        }
        lifecycle.local_addr = None;
        self.set_state(ListenerState::Stopped);
        info!("p2p listener stopped");
    }

    /// Abort the periodic gateway port rotation, if it runs.
    pub async fn stop_rotation(&self) {
        if let Some(rotation) = self.lifecycle.lock().await.rotation.take() {
            rotation.abort();
            debug!("gateway port rotation stopped");
        }
    }

    async fn setup_reachability(&self, port: u16) -> Option<JoinHandle<()>> {
        let manager = self.shared.reachability.clone()?;
        let local_ip = reachability::local_ip().unwrap_or(self.shared.config.bind_ip);
        match manager.setup(port, local_ip).await {
            Ok(Some(state)) => {
                info!(external = state.external_port, "listener reachable through gateway");
                manager
                    .config()
                    .rotation_interval
                    .map(|interval| manager.spawn_rotation(interval))
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = ?err, "gateway port mapping failed, continuing unmapped");
                self.shared
                    .report(DiagnosticKind::Reachability, &err, None);
                None
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if let Some(rotation) = lifecycle.rotation.take() {
            rotation.abort();
        }
        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

fn bind(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    dispatcher: Dispatcher,
    sender: Sender,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("accept loop cancelled");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let dispatcher = dispatcher.clone();
                    let sender = sender.clone();
                    let shared = Arc::clone(&shared);
                    tokio::spawn(handle_connection(stream, remote, dispatcher, sender, shared));
                }
                Err(err) if is_transient(&err) => {
                    warn!(error = ?err, "listener accept failed, backing off");
                    sleep(ACCEPT_BACKOFF).await;
                }
                Err(err) => {
                    if *shutdown.borrow() {
                        debug!(error = ?err, "listener closed during shutdown");
                    } else {
                        error!(error = ?err, "listening socket failed");
                        shared.report(DiagnosticKind::Accept, &err, None);
                    }
                    break;
                }
            }
        }
    }
    // Dropping `listener` here closes the socket.
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || err.raw_os_error().is_some_and(|code| code == 23 || code == 24)
}

/// Read the single envelope of an inbound connection, apply it, then send
/// the reply (if any) and publish the event.
async fn handle_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    dispatcher: Dispatcher,
    sender: Sender,
    shared: Arc<Shared>,
) {
    let config = &shared.config;
    let read = timeout(
        config.read_timeout,
        read_envelope(&mut stream, config.max_frame_len),
    )
    .await;
    drop(stream);

    let envelope = match read {
        Ok(Ok(envelope)) => envelope,
        Ok(Err(err)) => {
            warn!(%remote, error = ?err, "rejecting inbound data");
            shared.report(DiagnosticKind::Decode, &err, Some(remote));
            return;
        }
        Err(_) => {
            warn!(%remote, "timed out waiting for envelope");
            shared.report(DiagnosticKind::Decode, "timed out waiting for envelope", Some(remote));
            return;
        }
    };
    debug!(%remote, kind = %envelope.kind(), peer = %envelope.sender(), "envelope received");

    let Dispatch { reply, event } = dispatcher.dispatch(envelope, remote);
    if let Some((target, reply)) = reply {
        if let Err(err) = sender.send_envelope(target, &reply).await {
            warn!(%target, error = ?err, "failed to send handshake reply");
            shared.report(DiagnosticKind::Send, format!("handshake reply: {err}"), Some(target));
        }
    }
    if let Some(event) = event {
        shared.publish(event);
    }
}
