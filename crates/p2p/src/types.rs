use std::fmt;
use std::net::SocketAddr;

use uuid::Uuid;

/// Globally unique 128-bit peer identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for PeerId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Public half of a peer identity, as carried in Connect envelopes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerProfile {
    pub id: PeerId,
    pub nickname: String,
    /// Key material the local cipher encrypts payloads for this peer with.
    pub public_key: Vec<u8>,
}

impl PeerProfile {
    pub fn new(id: PeerId, nickname: impl Into<String>, public_key: Vec<u8>) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            public_key,
        }
    }
}

/// Registry entry for a remote peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRecord {
    pub profile: PeerProfile,
    /// Where the peer accepts connections, not the ephemeral source port it
    /// dialed from.
    pub address: SocketAddr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    Connect = 0,
    LogOff = 1,
    NickUpdate = 2,
    Message = 3,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Connect => "connect",
            EnvelopeKind::LogOff => "log-off",
            EnvelopeKind::NickUpdate => "nick-update",
            EnvelopeKind::Message => "message",
        }
    }
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EnvelopeKind::Connect),
            1 => Ok(EnvelopeKind::LogOff),
            2 => Ok(EnvelopeKind::NickUpdate),
            3 => Ok(EnvelopeKind::Message),
            other => Err(other),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `(peer, a, b)` correlation triple whose meaning depends on the kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InfoTuple {
    pub peer: Option<PeerId>,
    pub a: String,
    pub b: String,
}

/// Single wire message exchanged between peers. One envelope travels per
/// TCP connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    /// Handshake. `reply_port` is where the sender accepts connections.
    Connect { profile: PeerProfile, reply_port: u16 },
    LogOff { peer: PeerId, nickname: String },
    NickUpdate {
        peer: PeerId,
        old_nick: String,
        new_nick: String,
    },
    /// Chat message; `payload` is ciphertext sealed for the recipient.
    Message {
        peer: PeerId,
        nickname: String,
        payload: Vec<u8>,
    },
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Connect { .. } => EnvelopeKind::Connect,
            Envelope::LogOff { .. } => EnvelopeKind::LogOff,
            Envelope::NickUpdate { .. } => EnvelopeKind::NickUpdate,
            Envelope::Message { .. } => EnvelopeKind::Message,
        }
    }

    /// Identifier of the peer that built the envelope.
    pub fn sender(&self) -> PeerId {
        match self {
            Envelope::Connect { profile, .. } => profile.id,
            Envelope::LogOff { peer, .. }
            | Envelope::NickUpdate { peer, .. }
            | Envelope::Message { peer, .. } => *peer,
        }
    }

    pub fn info(&self) -> InfoTuple {
        match self {
            Envelope::Connect { .. } => InfoTuple::default(),
            Envelope::LogOff { peer, nickname } => InfoTuple {
                peer: Some(*peer),
                a: nickname.clone(),
                b: String::new(),
            },
            Envelope::NickUpdate {
                peer,
                old_nick,
                new_nick,
            } => InfoTuple {
                peer: Some(*peer),
                a: old_nick.clone(),
                b: new_nick.clone(),
            },
            Envelope::Message { peer, nickname, .. } => InfoTuple {
                peer: Some(*peer),
                a: nickname.clone(),
                b: String::new(),
            },
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Envelope::Message { payload, .. } => Some(payload),
            _ => None,
        }
    }
}
