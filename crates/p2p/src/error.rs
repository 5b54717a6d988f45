use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out talking to {0}")]
    Timeout(SocketAddr),
    #[error("invalid peer address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("malformed envelope: {0}")]
    Decode(#[from] DecodeError),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("envelope too large to frame ({0} bytes)")]
    FrameTooLarge(usize),
}

/// Reasons an inbound frame is rejected before it reaches the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("invalid cbor: {0}")]
    Cbor(String),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),
    #[error("{kind} envelope is missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("{kind} envelope must not carry {field}")]
    UnexpectedField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("peer id must be 16 bytes, got {0}")]
    InvalidPeerId(usize),
    #[error("reply port must be non-zero")]
    InvalidReplyPort,
}

/// Rejected `ip:port` input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("expected ip:port, no port in {0:?}")]
    MissingPort(String),
    #[error("invalid ip address {0:?}")]
    InvalidIp(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("no gateway available: {0}")]
    NoGateway(String),
    #[error("gateway refused mapping {external} -> {internal}: {reason}")]
    Refused {
        external: u16,
        internal: u16,
        reason: String,
    },
    #[error("reachability probe failed: {0}")]
    Probe(String),
}

impl From<NetworkError> for io::Error {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Io(e) => e,
            NetworkError::Bind { source, .. } => source,
            other => io::Error::other(other),
        }
    }
}

impl NetworkError {
    /// True for failures caused by a remote peer or the path to it, as
    /// opposed to local misuse.
    pub fn is_transport(&self) -> bool {
        matches!(self, NetworkError::Io(_) | NetworkError::Timeout(_))
    }
}
