use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::Shared;
use crate::events::{Diagnostic, DiagnosticKind, NetworkEvent};
use crate::types::{Envelope, PeerId, PeerProfile};

/// What the connection task must do after an envelope was applied.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Envelope to send back, and where.
    pub reply: Option<(SocketAddr, Envelope)>,
    pub event: Option<NetworkEvent>,
}

impl Dispatch {
    fn ignore() -> Self {
        Self::default()
    }

    fn event(event: NetworkEvent) -> Self {
        Self {
            reply: None,
            event: Some(event),
        }
    }
}

/// Applies decoded envelopes to the peer registry.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Apply `envelope`, received on a connection from `remote`.
    pub fn dispatch(&self, envelope: Envelope, remote: SocketAddr) -> Dispatch {
        match envelope {
            Envelope::Connect {
                profile,
                reply_port,
            } => self.on_connect(profile, reply_port, remote),
            Envelope::LogOff { peer, .. } => self.on_log_off(peer),
            Envelope::NickUpdate {
                peer,
                old_nick,
                new_nick,
            } => self.on_nick_update(peer, old_nick, new_nick),
            Envelope::Message {
                peer,
                nickname,
                payload,
            } => self.on_message(peer, nickname, &payload, remote),
        }
    }

    fn on_connect(&self, profile: PeerProfile, reply_port: u16, remote: SocketAddr) -> Dispatch {
        let identity = &self.shared.identity;
        if profile.id == identity.id() {
            debug!(%remote, "ignoring connect carrying our own id");
            return Dispatch::ignore();
        }
        // The source port of an inbound connection is ephemeral; the peer
        // tells us where it listens.
        let address = SocketAddr::new(remote.ip(), reply_port);
        let id = profile.id;
        let nickname = profile.nickname.clone();
        if !self.shared.registry.insert_new(profile, address) {
            debug!(peer = %id, %remote, "peer already registered");
            return Dispatch::ignore();
        }
        info!(peer = %id, nick = %nickname, %address, "peer joined");

        let reply = Envelope::Connect {
            profile: identity.profile(),
            reply_port: self.shared.advertised_port(),
        };
        Dispatch {
            reply: Some((address, reply)),
            event: Some(NetworkEvent::PeerJoined {
                id,
                nickname,
                address,
            }),
        }
    }

    fn on_log_off(&self, peer: PeerId) -> Dispatch {
        match self.shared.registry.remove(&peer) {
            Some(record) => {
                info!(%peer, nick = %record.profile.nickname, "peer left");
                Dispatch::event(NetworkEvent::PeerLeft {
                    id: peer,
                    nickname: record.profile.nickname,
                })
            }
            None => {
                debug!(%peer, "log-off from unknown peer");
                Dispatch::ignore()
            }
        }
    }

    fn on_nick_update(&self, peer: PeerId, old_nick: String, new_nick: String) -> Dispatch {
        if self.shared.registry.rename_nick(&peer, new_nick.clone()).is_none() {
            debug!(%peer, "nick update from unknown peer");
            return Dispatch::ignore();
        }
        info!(%peer, from = %old_nick, to = %new_nick, "peer changed nick");
        Dispatch::event(NetworkEvent::NickChanged {
            id: peer,
            old_nick,
            new_nick,
        })
    }

    fn on_message(
        &self,
        peer: PeerId,
        nickname: String,
        payload: &[u8],
        remote: SocketAddr,
    ) -> Dispatch {
        match self.shared.identity.decrypt(payload) {
            Ok(plaintext) => Dispatch::event(NetworkEvent::MessageReceived {
                id: peer,
                nickname,
                text: String::from_utf8_lossy(&plaintext).into_owned(),
            }),
            Err(err) => {
                warn!(%peer, %remote, error = %err, "dropping undecryptable message");
                Dispatch::event(NetworkEvent::Diagnostic(Diagnostic::new(
                    DiagnosticKind::Decrypt,
                    format!("message from {peer}: {err}"),
                    Some(remote),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::P2pConfig;
    use crate::identity::LocalIdentity;
    use crate::registry::PeerRegistry;
    use tokio::sync::mpsc;

    struct Fixture {
        dispatcher: Dispatcher,
        registry: PeerRegistry,
        local: Arc<LocalIdentity>,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(LocalIdentity::generate("me"));
        let registry = PeerRegistry::new();
        let (events, _rx) = mpsc::unbounded_channel();
        let config = P2pConfig {
            listen_port: 9000,
            ..P2pConfig::default()
        };
        let shared = Arc::new(Shared::new(
            config,
            local.clone(),
            registry.clone(),
            Arc::new(events),
            None,
        ));
        Fixture {
            dispatcher: Dispatcher::new(shared),
            registry,
            local,
        }
    }

    fn remote() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 5], 53211))
    }

    fn connect(identity: &LocalIdentity, reply_port: u16) -> Envelope {
        Envelope::Connect {
            profile: identity.profile(),
            reply_port,
        }
    }

    #[test]
    fn connect_registers_peer_at_reply_port_and_replies() {
        let fx = fixture();
        let alice = LocalIdentity::generate("alice");
        let out = fx.dispatcher.dispatch(connect(&alice, 9100), remote());

        let expected = SocketAddr::from(([10, 0, 0, 5], 9100));
        let record = fx.registry.get(&alice.id()).expect("registered");
        assert_eq!(record.profile.nickname, "alice");
        assert_eq!(record.address, expected);

        let (target, reply) = out.reply.expect("reply");
        assert_eq!(target, expected);
        assert_eq!(
            reply,
            Envelope::Connect {
                profile: fx.local.profile(),
                reply_port: 9000,
            }
        );
        assert_eq!(
            out.event,
            Some(NetworkEvent::PeerJoined {
                id: alice.id(),
                nickname: "alice".into(),
                address: expected,
            })
        );
    }

    #[test]
    fn repeated_connect_is_a_no_op() {
        let fx = fixture();
        let alice = LocalIdentity::generate("alice");
        fx.dispatcher.dispatch(connect(&alice, 9100), remote());
        let before = fx.registry.snapshot();

        alice.set_nickname("renamed");
        let out = fx.dispatcher.dispatch(
            connect(&alice, 9200),
            SocketAddr::from(([10, 0, 0, 9], 40000)),
        );
        assert_eq!(out, Dispatch::default());
        assert_eq!(fx.registry.snapshot(), before);
    }

    #[test]
    fn own_connect_is_never_registered() {
        let fx = fixture();
        let out = fx.dispatcher.dispatch(connect(&fx.local, 9000), remote());
        assert_eq!(out, Dispatch::default());
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn log_off_then_connect_re_registers_at_new_address() {
        let fx = fixture();
        let alice = LocalIdentity::generate("alice");
        fx.dispatcher.dispatch(connect(&alice, 9100), remote());

        let out = fx.dispatcher.dispatch(
            Envelope::LogOff {
                peer: alice.id(),
                nickname: "ignored".into(),
            },
            remote(),
        );
        assert_eq!(
            out.event,
            Some(NetworkEvent::PeerLeft {
                id: alice.id(),
                nickname: "alice".into(),
            })
        );
        assert!(fx.registry.is_empty());

        let moved = SocketAddr::from(([10, 0, 0, 7], 1));
        fx.dispatcher.dispatch(connect(&alice, 9300), moved);
        assert_eq!(
            fx.registry.get(&alice.id()).map(|r| r.address),
            Some(SocketAddr::from(([10, 0, 0, 7], 9300)))
        );
    }

    #[test]
    fn log_off_from_unknown_peer_is_ignored() {
        let fx = fixture();
        let out = fx.dispatcher.dispatch(
            Envelope::LogOff {
                peer: PeerId::random(),
                nickname: "ghost".into(),
            },
            remote(),
        );
        assert_eq!(out, Dispatch::default());
    }

    #[test]
    fn nick_update_renames_by_id() {
        let fx = fixture();
        let alice = LocalIdentity::generate("alice");
        fx.dispatcher.dispatch(connect(&alice, 9100), remote());

        let out = fx.dispatcher.dispatch(
            Envelope::NickUpdate {
                peer: alice.id(),
                old_nick: "not-what-we-had".into(),
                new_nick: "alicia".into(),
            },
            remote(),
        );
        assert_eq!(
            fx.registry.get(&alice.id()).map(|r| r.profile.nickname),
            Some("alicia".into())
        );
        assert_eq!(
            out.event,
            Some(NetworkEvent::NickChanged {
                id: alice.id(),
                old_nick: "not-what-we-had".into(),
                new_nick: "alicia".into(),
            })
        );
    }

    #[test]
    fn nick_update_for_absent_peer_inserts_nothing() {
        let fx = fixture();
        let out = fx.dispatcher.dispatch(
            Envelope::NickUpdate {
                peer: PeerId::random(),
                old_nick: "a".into(),
                new_nick: "b".into(),
            },
            remote(),
        );
        assert_eq!(out, Dispatch::default());
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn message_is_decrypted_with_local_identity() {
        let fx = fixture();
        let alice = LocalIdentity::generate("alice");
        let payload = alice
            .encrypt_for(&fx.local.profile(), "hi".as_bytes())
            .expect("encrypt");
        let out = fx.dispatcher.dispatch(
            Envelope::Message {
                peer: alice.id(),
                nickname: "alice".into(),
                payload,
            },
            remote(),
        );
        assert_eq!(
            out.event,
            Some(NetworkEvent::MessageReceived {
                id: alice.id(),
                nickname: "alice".into(),
                text: "hi".into(),
            })
        );
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn undecryptable_message_becomes_diagnostic_and_keeps_sender() {
        let fx = fixture();
        let alice = LocalIdentity::generate("alice");
        fx.dispatcher.dispatch(connect(&alice, 9100), remote());

        let out = fx.dispatcher.dispatch(
            Envelope::Message {
                peer: alice.id(),
                nickname: "alice".into(),
                payload: vec![0u8; 8],
            },
            remote(),
        );
        match out.event {
            Some(NetworkEvent::Diagnostic(diag)) => {
                assert_eq!(diag.kind, DiagnosticKind::Decrypt);
                assert_eq!(diag.remote, Some(remote()));
            }
            other => panic!("expected decrypt diagnostic, got {other:?}"),
        }
        assert!(out.reply.is_none());
        assert!(fx.registry.contains(&alice.id()));
    }
}
