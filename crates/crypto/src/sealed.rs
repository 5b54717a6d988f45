//! X25519 sealed boxes.
//!
//! ## Construction
//!
//! ```text
//! (eph_sk, eph_pk) ← X25519.KeyGen()
//! shared           ← X25519(eph_sk, recipient_pk)
//! key              ← BLAKE3.derive_key(DOMAIN, shared || eph_pk || recipient_pk)
//! nonce            ← random 12 bytes
//! sealed           = eph_pk || nonce || ChaCha20Poly1305(key, nonce, plaintext)
//! ```
//!
//! The recipient recomputes `shared` from its static secret and `eph_pk`.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use curve25519_dalek::MontgomeryPoint;
use rand_core::{OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Domain separation context for the sealing KDF.
const DOMAIN: &str = "parley 2024 sealed-box payload key v1";

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SECRET_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Bytes added to every plaintext by [`seal`].
pub const SEALED_OVERHEAD: usize = PUBLIC_KEY_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key length {0}")]
    InvalidPublicKey(usize),
    #[error("invalid secret key length {0}")]
    InvalidSecretKey(usize),
    #[error("ciphertext too short ({0} bytes)")]
    Truncated(usize),
    #[error("degenerate shared secret")]
    WeakKey,
    #[error("authentication failed")]
    Authentication,
    #[error("encryption failed")]
    Encryption,
}

/// Static X25519 key pair identifying a peer.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeys {
    secret: [u8; SECRET_KEY_LEN],
    #[zeroize(skip)]
    public: [u8; PUBLIC_KEY_LEN],
}

impl IdentityKeys {
    /// Generate a fresh key pair from the operating system RNG.
    pub fn generate() -> Self {
        let mut secret = [0u8; SECRET_KEY_LEN];
        OsRng.fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    pub fn from_secret(secret: [u8; SECRET_KEY_LEN]) -> Self {
        let public = MontgomeryPoint::mul_base_clamped(secret).to_bytes();
        Self { secret, public }
    }

    pub fn from_secret_slice(secret: &[u8]) -> Result<Self, CryptoError> {
        let secret: [u8; SECRET_KEY_LEN] = secret
            .try_into()
            .map_err(|_| CryptoError::InvalidSecretKey(secret.len()))?;
        Ok(Self::from_secret(secret))
    }

    /// Parse a hex encoded secret key as written by `parley-node keygen`.
    pub fn from_secret_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            hex::decode(encoded.trim()).map_err(|_| CryptoError::InvalidSecretKey(encoded.len()))?,
        );
        Self::from_secret_slice(&bytes)
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public
    }

    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.secret))
    }

    /// Open a box sealed to this key pair.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.secret, &self.public, sealed)
    }
}

impl fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` so that only the holder of `recipient`'s secret key
/// can read it.
pub fn seal(recipient: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let recipient: [u8; PUBLIC_KEY_LEN] = recipient
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey(recipient.len()))?;

    let mut ephemeral = Zeroizing::new([0u8; SECRET_KEY_LEN]);
    OsRng.fill_bytes(&mut *ephemeral);
    let ephemeral_pk = MontgomeryPoint::mul_base_clamped(*ephemeral).to_bytes();
    let shared = Zeroizing::new(MontgomeryPoint(recipient).mul_clamped(*ephemeral).to_bytes());
    if shared.iter().all(|b| *b == 0) {
        return Err(CryptoError::WeakKey);
    }

    let key = derive_key(&shared, &ephemeral_pk, &recipient);
    let cipher = ChaCha20Poly1305::new_from_slice(&key[..]).map_err(|_| CryptoError::Encryption)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut sealed = Vec::with_capacity(SEALED_OVERHEAD + plaintext.len());
    sealed.extend_from_slice(&ephemeral_pk);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a box produced by [`seal`] for the key pair `(secret, public)`.
pub fn open(
    secret: &[u8; SECRET_KEY_LEN],
    public: &[u8; PUBLIC_KEY_LEN],
    sealed: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEALED_OVERHEAD {
        return Err(CryptoError::Truncated(sealed.len()));
    }
    let (ephemeral_pk, rest) = sealed.split_at(PUBLIC_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let ephemeral_pk: [u8; PUBLIC_KEY_LEN] = ephemeral_pk
        .try_into()
        .map_err(|_| CryptoError::Truncated(sealed.len()))?;

    let shared = Zeroizing::new(MontgomeryPoint(ephemeral_pk).mul_clamped(*secret).to_bytes());
    if shared.iter().all(|b| *b == 0) {
        return Err(CryptoError::WeakKey);
    }

    let key = derive_key(&shared, &ephemeral_pk, public);
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key[..]).map_err(|_| CryptoError::Authentication)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

fn derive_key(
    shared: &[u8; 32],
    ephemeral_pk: &[u8; PUBLIC_KEY_LEN],
    recipient: &[u8; PUBLIC_KEY_LEN],
) -> Zeroizing<[u8; 32]> {
    let mut material = Zeroizing::new([0u8; 96]);
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral_pk);
    material[64..].copy_from_slice(recipient);
    Zeroizing::new(blake3::derive_key(DOMAIN, &material[..]))
}
