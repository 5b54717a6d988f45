use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::warn;

use crate::types::PeerId;

/// Notifications the network publishes to its host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    PeerJoined {
        id: PeerId,
        nickname: String,
        address: SocketAddr,
    },
    PeerLeft {
        id: PeerId,
        nickname: String,
    },
    NickChanged {
        id: PeerId,
        old_nick: String,
        new_nick: String,
    },
    MessageReceived {
        id: PeerId,
        nickname: String,
        text: String,
    },
    Diagnostic(Diagnostic),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// The accept loop hit an error on the listening socket.
    Accept,
    /// An inbound connection did not carry a well-formed envelope.
    Decode,
    /// A message payload could not be decrypted.
    Decrypt,
    /// Delivery to a peer failed.
    Send,
    /// NAT mapping or probing failed.
    Reachability,
}

/// Error report surfaced to the host instead of a UI popup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
    pub remote: Option<SocketAddr>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, detail: impl fmt::Display, remote: Option<SocketAddr>) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
            remote,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)?;
        if let Some(remote) = self.remote {
            write!(f, " (remote {remote})")?;
        }
        Ok(())
    }
}

/// Receiver of [`NetworkEvent`]s, supplied when the network is built.
///
/// `publish` is called from whichever task produced the event and must not
/// block; hosts that need a particular thread drain a channel there.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: NetworkEvent);
}

/// Bounded sink: when the queue is full the event is dropped, so hosts that
/// must see every join and leave should use the unbounded sender.
impl EventSink for mpsc::Sender<NetworkEvent> {
    fn publish(&self, event: NetworkEvent) {
        if let Err(err) = self.try_send(event) {
            warn!(error = %err, "event sink unavailable, dropping event");
        }
    }
}

impl EventSink for mpsc::UnboundedSender<NetworkEvent> {
    fn publish(&self, event: NetworkEvent) {
        if self.send(event).is_err() {
            warn!("event sink closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;

    fn left(nickname: &str) -> NetworkEvent {
        NetworkEvent::PeerLeft {
            id: PeerId::random(),
            nickname: nickname.to_string(),
        }
    }

    #[test]
    fn bounded_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.publish(left("a"));
        tx.publish(left("b"));
        assert!(matches!(rx.try_recv(), Ok(NetworkEvent::PeerLeft { nickname, .. }) if nickname == "a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unbounded_sink_keeps_every_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..1000 {
            tx.publish(left(&i.to_string()));
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 1000);
    }
}
