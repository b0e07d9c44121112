//! # Edgelink Crypto
//!
//! Blockchain identity and message security for the edgelink client:
//!
//! - secp256k1 keypairs bound to `0xai_` network addresses
//! - deterministic envelope hashing over a stable JSON serialization
//! - ECDSA (RFC 6979) envelope signing and verification
//! - end-to-end encryption from an ECDH shared secret through
//!   HKDF-SHA256 into AES-256-GCM
//!
//! ## Canonical form
//!
//! The identity of an envelope's data portion is the SHA-256 of its
//! stable JSON serialization with the authority fields (`EE_SIGN`,
//! `EE_SENDER`, `EE_HASH`) removed. Verifiers recompute the same bytes;
//! the authority fields must stay out of the hash or signatures would be
//! self-referential.

pub mod cipher;
pub mod envelope;
pub mod errors;
pub mod hashing;
pub mod identity;

pub use cipher::{decrypt_from, encrypt_for, HANDSHAKE_INFO};
pub use envelope::{sign_envelope, verify_envelope, verify_envelope_detailed, VerificationResult};
pub use errors::CryptoError;
pub use hashing::{sha256_hex, stable_hash_hex, stable_json_string};
pub use identity::EdgeIdentity;
