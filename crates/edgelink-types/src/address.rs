//! # Network Addresses
//!
//! A network address is the URL-safe base64 encoding of a compressed
//! secp256k1 public key, carrying the `0xai_` prefix. The address is the
//! canonical identity of every participant; it is bijective with the
//! public key.
//!
//! Legacy senders still emit the `aixp_` prefix; it is accepted on parse
//! and normalised, but only the canonical prefix is ever emitted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Canonical address prefix.
pub const ADDRESS_PREFIX: &str = "0xai_";

/// Legacy address prefix, accepted on ingest only.
pub const LEGACY_ADDRESS_PREFIX: &str = "aixp_";

/// Length of a compressed SEC1 secp256k1 public key.
pub const COMPRESSED_KEY_LEN: usize = 33;

/// Errors from address parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The string does not start with a known prefix.
    #[error("malformed address: unknown prefix in {0:?}")]
    UnknownPrefix(String),

    /// The base64 portion did not decode.
    #[error("malformed address: invalid base64")]
    InvalidBase64,

    /// The decoded key material has the wrong length or SEC1 tag.
    #[error("malformed address: not a compressed secp256k1 point")]
    InvalidKeyBytes,
}

/// A canonical network address (`0xai_` + URL-safe base64 of the
/// compressed public key).
///
/// Construction always validates: the base64 must decode to exactly 33
/// bytes with a compressed-point SEC1 tag. Full on-curve validation is
/// performed by the crypto crate when the public key is actually needed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(String);

impl Address {
    /// Parse an address string, accepting the legacy prefix.
    ///
    /// The returned address is always in canonical form.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let encoded = if let Some(rest) = input.strip_prefix(ADDRESS_PREFIX) {
            rest
        } else if let Some(rest) = input.strip_prefix(LEGACY_ADDRESS_PREFIX) {
            rest
        } else {
            return Err(AddressError::UnknownPrefix(input.to_string()));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|_| AddressError::InvalidBase64)?;
        validate_compressed(&bytes)?;

        Ok(Self(format!("{ADDRESS_PREFIX}{encoded}")))
    }

    /// Build an address from a compressed SEC1 public key.
    pub fn from_compressed_bytes(bytes: &[u8; COMPRESSED_KEY_LEN]) -> Self {
        Self(format!("{ADDRESS_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Decode the compressed public key bytes carried by this address.
    pub fn compressed_bytes(&self) -> [u8; COMPRESSED_KEY_LEN] {
        // Validated at construction, so the decode cannot fail.
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.0[ADDRESS_PREFIX.len()..])
            .unwrap_or_default();
        let mut out = [0u8; COMPRESSED_KEY_LEN];
        if bytes.len() == COMPRESSED_KEY_LEN {
            out.copy_from_slice(&bytes);
        }
        out
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a string carries one of the known address prefixes.
    ///
    /// Used to tell addresses apart from human node names in mixed inputs;
    /// it does not validate the key material.
    #[must_use]
    pub fn looks_like_address(input: &str) -> bool {
        input.starts_with(ADDRESS_PREFIX) || input.starts_with(LEGACY_ADDRESS_PREFIX)
    }
}

fn validate_compressed(bytes: &[u8]) -> Result<(), AddressError> {
    if bytes.len() != COMPRESSED_KEY_LEN {
        return Err(AddressError::InvalidKeyBytes);
    }
    if bytes[0] != 0x02 && bytes[0] != 0x03 {
        return Err(AddressError::InvalidKeyBytes);
    }
    Ok(())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
