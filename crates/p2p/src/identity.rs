use std::sync::Arc;

use crypto::IdentityKeys;
use parking_lot::RwLock;

use crate::error::CipherError;
use crate::types::{PeerId, PeerProfile};

/// Payload encryption capability of the local peer.
///
/// `encrypt` seals bytes for a remote peer given the key material from that
/// peer's profile; `decrypt` opens bytes sealed for us.
pub trait Cipher: Send + Sync + 'static {
    fn public_key(&self) -> Vec<u8>;

    fn encrypt(&self, recipient_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

impl Cipher for IdentityKeys {
    fn public_key(&self) -> Vec<u8> {
        IdentityKeys::public_key(self).to_vec()
    }

    fn encrypt(&self, recipient_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        crypto::seal(recipient_key, plaintext).map_err(|err| CipherError::Encrypt(err.to_string()))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.open(ciphertext)
            .map_err(|err| CipherError::Decrypt(err.to_string()))
    }
}

/// The identity this process speaks as. Never stored in the peer registry.
pub struct LocalIdentity {
    id: PeerId,
    nickname: RwLock<String>,
    cipher: Arc<dyn Cipher>,
}

impl LocalIdentity {
    pub fn new(id: PeerId, nickname: impl Into<String>, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            id,
            nickname: RwLock::new(nickname.into()),
            cipher,
        }
    }

    /// Fresh identity with a random id and newly generated keys.
    pub fn generate(nickname: impl Into<String>) -> Self {
        Self::new(
            PeerId::random(),
            nickname,
            Arc::new(IdentityKeys::generate()),
        )
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn nickname(&self) -> String {
        self.nickname.read().clone()
    }

    /// Replace the nickname, returning the previous one.
    pub fn set_nickname(&self, nickname: impl Into<String>) -> String {
        std::mem::replace(&mut *self.nickname.write(), nickname.into())
    }

    pub fn profile(&self) -> PeerProfile {
        PeerProfile {
            id: self.id,
            nickname: self.nickname(),
            public_key: self.cipher.public_key(),
        }
    }

    pub fn encrypt_for(&self, peer: &PeerProfile, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.cipher.encrypt(&peer.public_key, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.cipher.decrypt(ciphertext)
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("id", &self.id)
            .field("nickname", &*self.nickname.read())
            .finish_non_exhaustive()
    }
}
