use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::codec::{encode_frame, write_frame};
use crate::context::Shared;
use crate::error::{AddressError, NetworkError};
use crate::events::DiagnosticKind;
use crate::types::{Envelope, PeerId, PeerRecord};

/// Presence notifications broadcast without a per-peer payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presence {
    LogOff,
    /// The local nickname changed; the current nickname is the new one.
    NickUpdate { old_nick: String },
}

#[derive(Debug)]
pub struct SendFailure {
    pub peer: PeerId,
    pub address: SocketAddr,
    pub error: NetworkError,
}

/// Per-peer outcome of a broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<PeerId>,
    pub failed: Vec<SendFailure>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Builds envelopes and delivers them, one short-lived connection each.
#[derive(Clone)]
pub struct Sender {
    shared: Arc<Shared>,
}

impl Sender {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Encrypt `text` separately for every registered peer and deliver it.
    pub async fn send_message(&self, text: &str) -> BroadcastReport {
        let plaintext: Arc<[u8]> = Arc::from(text.as_bytes());
        self.broadcast(move |sender, record| {
            let plaintext = Arc::clone(&plaintext);
            async move { sender.send_message_to(&record, &plaintext).await }
        })
        .await
    }

    async fn send_message_to(&self, record: &PeerRecord, plaintext: &[u8]) -> Result<(), NetworkError> {
        let identity = &self.shared.identity;
        let payload = identity.encrypt_for(&record.profile, plaintext)?;
        let envelope = Envelope::Message {
            peer: identity.id(),
            nickname: identity.nickname(),
            payload,
        };
        self.transmit(record.address, &encode_frame(&envelope)?).await
    }

    /// Broadcast a presence envelope. The frame is encoded once and the same
    /// bytes go to every peer.
    pub async fn send_presence(&self, presence: Presence) -> BroadcastReport {
        let identity = &self.shared.identity;
        let envelope = match presence {
            Presence::LogOff => Envelope::LogOff {
                peer: identity.id(),
                nickname: identity.nickname(),
            },
            Presence::NickUpdate { old_nick } => Envelope::NickUpdate {
                peer: identity.id(),
                old_nick,
                new_nick: identity.nickname(),
            },
        };
        self.broadcast_envelope(&envelope).await
    }

    /// Change the local nickname and tell every peer.
    pub async fn change_nick(&self, nickname: impl Into<String>) -> BroadcastReport {
        let old_nick = self.shared.identity.set_nickname(nickname);
        self.send_presence(Presence::NickUpdate { old_nick }).await
    }

    /// Send a Connect to every registered address.
    pub async fn announce(&self) -> BroadcastReport {
        let envelope = self.connect_envelope();
        self.broadcast_envelope(&envelope).await
    }

    /// Parse `ip:port` and start the handshake with that address.
    pub async fn connect_to_remote(&self, address: &str) -> Result<(), NetworkError> {
        let target = parse_peer_address(address)?;
        self.deliver_connect(target).await
    }

    pub async fn deliver_connect(&self, target: SocketAddr) -> Result<(), NetworkError> {
        let result = match encode_frame(&self.connect_envelope()) {
            Ok(frame) => self.transmit(target, &frame).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            warn!(%target, error = %err, "failed to deliver connect request");
            self.shared
                .report(DiagnosticKind::Send, format!("connect request: {err}"), Some(target));
        }
        result
    }

    /// Deliver a single envelope; used for handshake replies.
    pub async fn send_envelope(&self, target: SocketAddr, envelope: &Envelope) -> Result<(), NetworkError> {
        self.transmit(target, &encode_frame(envelope)?).await
    }

    fn connect_envelope(&self) -> Envelope {
        Envelope::Connect {
            profile: self.shared.identity.profile(),
            reply_port: self.shared.advertised_port(),
        }
    }

    async fn broadcast_envelope(&self, envelope: &Envelope) -> BroadcastReport {
        let frame: Arc<[u8]> = match encode_frame(envelope) {
            Ok(frame) => frame.into(),
            Err(err) => {
                warn!(kind = %envelope.kind(), error = %err, "failed to encode broadcast");
                return BroadcastReport::default();
            }
        };
        self.broadcast(move |sender, record| {
            let frame = Arc::clone(&frame);
            async move { sender.transmit(record.address, &frame).await }
        })
        .await
    }

    /// Run `send` for every peer in a registry snapshot, each in its own
    /// task. A failing peer never stops delivery to the others and is not
    /// removed from the registry.
    async fn broadcast<F, Fut>(&self, send: F) -> BroadcastReport
    where
        F: Fn(Sender, PeerRecord) -> Fut,
        Fut: Future<Output = Result<(), NetworkError>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for record in self.shared.registry.snapshot() {
            let peer = record.profile.id;
            let address = record.address;
            let fut = send(self.clone(), record);
            tasks.spawn(async move { (peer, address, fut.await) });
        }

        let mut report = BroadcastReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, _, Ok(()))) => report.delivered.push(peer),
                Ok((peer, address, Err(error))) => {
                    warn!(%peer, %address, error = %error, "send to peer failed");
                    self.shared
                        .report(DiagnosticKind::Send, format!("peer {peer}: {error}"), Some(address));
                    report.failed.push(SendFailure {
                        peer,
                        address,
                        error,
                    });
                }
                Err(err) => warn!(error = %err, "send task aborted"),
            }
        }
        report
    }

    async fn transmit(&self, target: SocketAddr, frame: &[u8]) -> Result<(), NetworkError> {
        let connect_timeout = self.shared.config.connect_timeout;
        let mut stream = timeout(connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| NetworkError::Timeout(target))??;
        write_frame(&mut stream, frame).await?;
        stream.shutdown().await?;
        debug!(%target, bytes = frame.len(), "envelope delivered");
        Ok(())
    }
}

/// Parse an `ip:port` peer address. IPv6 hosts may be bracketed.
pub fn parse_peer_address(input: &str) -> Result<SocketAddr, AddressError> {
    let input = input.trim();
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| AddressError::MissingPort(input.to_string()))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let ip: IpAddr = host
        .parse()
        .map_err(|_| AddressError::InvalidIp(host.to_string()))?;
    let port: u16 = port
        .parse()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| AddressError::InvalidPort(port.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}
