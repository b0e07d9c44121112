//! Crypto error types.

use edgelink_types::AddressError;
use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The address cannot be decoded into a public key.
    #[error("malformed address: {0}")]
    MalformedAddress(#[from] AddressError),

    /// The decoded key bytes are not a valid curve point.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// The private key material is invalid.
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Key generation or derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Key export failed.
    #[error("key export failed: {0}")]
    KeyExportFailed(String),

    /// Encryption failed.
    #[error("encryption failed")]
    EncryptionFailed,
}
