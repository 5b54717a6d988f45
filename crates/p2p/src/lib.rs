//! Peer-to-peer messaging core for Parley.
//!
//! Every node both listens for inbound TCP connections and dials out to the
//! peers it knows. Each connection carries one length-prefixed CBOR
//! envelope (connect, log-off, nickname change or encrypted message) and
//! then closes. Incoming envelopes update a shared [`PeerRegistry`] and are
//! surfaced to the host through an [`EventSink`].

mod codec;
mod config;
mod context;
mod dispatcher;
mod error;
mod events;
mod identity;
mod listener;
mod network;
mod reachability;
mod registry;
mod sender;
mod types;

pub use codec::{
    PROTOCOL_VERSION, decode_envelope, encode_envelope, encode_frame, read_envelope,
    write_envelope, write_frame,
};
pub use config::{P2pConfig, RENDEZVOUS_PORT, ReachabilityConfig};
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::{AddressError, CipherError, DecodeError, MappingError, NetworkError};
pub use events::{Diagnostic, DiagnosticKind, EventSink, NetworkEvent};
pub use identity::{Cipher, LocalIdentity};
pub use listener::{Listener, ListenerState, StopMode};
pub use network::{NetworkHandle, start_network};
pub use reachability::{
    PortMapper, Probe, ReachabilityManager, ReachabilityProbe, ReachabilityState, local_ip,
};
pub use registry::PeerRegistry;
pub use sender::{BroadcastReport, Presence, SendFailure, Sender, parse_peer_address};
pub use types::{Envelope, EnvelopeKind, InfoTuple, PeerId, PeerProfile, PeerRecord};
