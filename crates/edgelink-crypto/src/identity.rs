//! # Blockchain Identity
//!
//! A secp256k1 keypair bound to a canonical network address. Identities
//! load from generated entropy, hex-encoded PKCS#8 DER, PEM, or a
//! deterministic secret-word phrase.

use crate::errors::CryptoError;
use edgelink_types::Address;
use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::Field;
use k256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use k256::Scalar;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Separator of the secret-word derivation phrase.
const SECRET_WORDS_SEPARATOR: &str = ";";

/// secp256k1 identity keypair.
pub struct EdgeIdentity {
    signing_key: SigningKey,
}

impl EdgeIdentity {
    /// Generate a random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Load from a hex-encoded PKCS#8 DER private key.
    pub fn from_der_hex(der_hex: &str) -> Result<Self, CryptoError> {
        let der = hex::decode(der_hex.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let signing_key = SigningKey::from_pkcs8_der(&der)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// Load from a PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// Derive deterministically from secret words:
    /// `sha256(join(words, ";")) mod n`, with n the secp256k1 order.
    pub fn from_secret_words<S: AsRef<str>>(words: &[S]) -> Result<Self, CryptoError> {
        let mut joined = words
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(SECRET_WORDS_SEPARATOR);
        let digest = Sha256::digest(joined.as_bytes());
        joined.zeroize();

        let scalar = <Scalar as Reduce<k256::U256>>::reduce_bytes(&digest);
        if bool::from(scalar.is_zero()) {
            return Err(CryptoError::KeyDerivationFailed(
                "derived scalar is zero".to_string(),
            ));
        }
        let signing_key = SigningKey::from_bytes(&scalar.to_bytes())
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// The canonical network address of this identity.
    #[must_use]
    pub fn address(&self) -> Address {
        let sec1 = self.signing_key.verifying_key().to_sec1_bytes();
        // SEC1 compressed public key is always exactly 33 bytes.
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(&sec1[..33]);
        Address::from_compressed_bytes(&bytes)
    }

    /// The verifying half of the keypair.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The signing key, for envelope signing and key agreement.
    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Compressed public key as lowercase hex.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_sec1_bytes())
    }

    /// Export as hex-encoded PKCS#8 DER.
    pub fn to_pkcs8_der_hex(&self) -> Result<String, CryptoError> {
        let doc = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeyExportFailed(e.to_string()))?;
        Ok(hex::encode(doc.as_bytes()))
    }

    /// Export as PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> Result<String, CryptoError> {
        let pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyExportFailed(e.to_string()))?;
        Ok(pem.to_string())
    }
}

impl Clone for EdgeIdentity {
    fn clone(&self) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
        }
    }
}

impl std::fmt::Debug for EdgeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        write!(f, "EdgeIdentity({})", self.address())
    }
}
