//! # End-to-End Encryption
//!
//! AES-256-GCM under a key agreed through ECDH and expanded with
//! HKDF-SHA256. The wire form is standard base64 of
//! `nonce(12) ‖ ciphertext ‖ tag(16)`.

use crate::errors::CryptoError;
use crate::identity::EdgeIdentity;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use edgelink_types::Address;
use hkdf::Hkdf;
use k256::PublicKey;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

/// HKDF info label of the handshake.
pub const HANDSHAKE_INFO: &[u8] = b"0xai handshake data";

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Derive the AES-256 key shared with a peer:
/// `HKDF-SHA256(ECDH(self, peer), salt = empty, info = handshake, L = 32)`.
fn shared_key(identity: &EdgeIdentity, peer: &Address) -> Result<[u8; 32], CryptoError> {
    let peer_key = PublicKey::from_sec1_bytes(&peer.compressed_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;

    let secret = k256::ecdh::diffie_hellman(
        identity.signing_key().as_nonzero_scalar(),
        peer_key.as_affine(),
    );

    let hk = Hkdf::<Sha256>::new(None, secret.raw_secret_bytes().as_slice());
    let mut key = [0u8; 32];
    hk.expand(HANDSHAKE_INFO, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

/// Encrypt a plaintext for a peer address.
pub fn encrypt_for(
    identity: &EdgeIdentity,
    peer: &Address,
    plaintext: &[u8],
) -> Result<String, CryptoError> {
    let mut key = shared_key(identity, peer)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    key.zeroize();

    let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(framed))
}

/// Decrypt a blob sent by a peer address.
///
/// Returns `None` on framing or authentication-tag failure; callers drop
/// the message.
#[must_use]
pub fn decrypt_from(identity: &EdgeIdentity, peer: &Address, encoded: &str) -> Option<Vec<u8>> {
    let mut key = shared_key(identity, peer).ok()?;
    let framed = STANDARD.decode(encoded).ok()?;
    if framed.len() < NONCE_LEN + TAG_LEN {
        key.zeroize();
        return None;
    }

    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    let plaintext = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .ok();
    key.zeroize();
    plaintext
}
