//! Identity keys and payload encryption for parley peers.
//!
//! Every peer owns a static X25519 key pair. Chat payloads are sealed to the
//! recipient's public key with a fresh ephemeral key per message.

mod sealed;

pub use sealed::{
    CryptoError, IdentityKeys, PUBLIC_KEY_LEN, SEALED_OVERHEAD, SECRET_KEY_LEN, open, seal,
};
