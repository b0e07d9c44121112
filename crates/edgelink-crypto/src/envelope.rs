//! # Envelope Signing and Verification
//!
//! The authority fields (`EE_SIGN`, `EE_SENDER`, `EE_HASH`) are stripped
//! before hashing so verifiers can recompute the canonical form; the
//! signature is ECDSA over the canonical bytes (the digest signed is
//! exactly the `EE_HASH` bytes), emitted as URL-safe base64 DER.

use crate::hashing::{sha256_hex, stable_json_string};
use crate::identity::EdgeIdentity;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use edgelink_types::envelope::{EE_HASH, EE_SENDER, EE_SIGN};
use edgelink_types::Address;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, VerifyingKey};
use serde_json::{Map, Value};

/// Fields excluded from the canonical form.
pub const AUTHORITY_FIELDS: [&str; 3] = [EE_SIGN, EE_SENDER, EE_HASH];

/// Outcome of envelope verification, with the failing check for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    /// All checks passed.
    Valid,
    /// A required authority field is missing or not a string.
    MissingField(&'static str),
    /// The sender address does not decode to a public key.
    MalformedSender,
    /// The recomputed hash differs from `EE_HASH`.
    HashMismatch,
    /// The signature does not decode or does not verify.
    InvalidSignature,
}

impl VerificationResult {
    /// Returns true when verification succeeded.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationResult::Valid)
    }
}

/// Sign an envelope's data portion, returning the envelope with the
/// authority fields attached.
///
/// Any pre-existing authority fields are discarded first so re-signing a
/// received envelope is well-defined.
#[must_use]
pub fn sign_envelope(identity: &EdgeIdentity, mut envelope: Map<String, Value>) -> Map<String, Value> {
    for field in AUTHORITY_FIELDS {
        envelope.remove(field);
    }

    let canonical = stable_json_string(&Value::Object(envelope.clone()));
    let signature: Signature = identity.signing_key().sign(canonical.as_bytes());

    envelope.insert(
        EE_HASH.to_string(),
        Value::String(sha256_hex(canonical.as_bytes())),
    );
    envelope.insert(
        EE_SIGN.to_string(),
        Value::String(URL_SAFE_NO_PAD.encode(signature.to_der())),
    );
    envelope.insert(
        EE_SENDER.to_string(),
        Value::String(identity.address().as_str().to_string()),
    );
    envelope
}

/// Verify an envelope, reporting which check failed.
#[must_use]
pub fn verify_envelope_detailed(envelope: &Map<String, Value>) -> VerificationResult {
    let field = |name: &'static str| -> Result<&str, VerificationResult> {
        envelope
            .get(name)
            .and_then(Value::as_str)
            .ok_or(VerificationResult::MissingField(name))
    };

    let sender = match field(EE_SENDER) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sign = match field(EE_SIGN) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let expected_hash = match field(EE_HASH) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let Ok(address) = Address::parse(sender) else {
        return VerificationResult::MalformedSender;
    };
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&address.compressed_bytes()) else {
        return VerificationResult::MalformedSender;
    };

    let mut stripped = envelope.clone();
    for f in AUTHORITY_FIELDS {
        stripped.remove(f);
    }
    let canonical = stable_json_string(&Value::Object(stripped));
    let digest = sha256_hex(canonical.as_bytes());
    if !digest.eq_ignore_ascii_case(expected_hash) {
        return VerificationResult::HashMismatch;
    }

    let Some(der) = decode_signature_b64(sign) else {
        return VerificationResult::InvalidSignature;
    };
    let Ok(signature) = Signature::from_der(&der) else {
        return VerificationResult::InvalidSignature;
    };

    let Ok(hash_bytes) = hex::decode(digest) else {
        return VerificationResult::InvalidSignature;
    };
    if verifying_key
        .verify_prehash(&hash_bytes, &signature)
        .is_err()
    {
        return VerificationResult::InvalidSignature;
    }
    VerificationResult::Valid
}

/// Boolean verification, as used on the hot ingress path.
#[must_use]
pub fn verify_envelope(envelope: &Map<String, Value>) -> bool {
    verify_envelope_detailed(envelope).is_valid()
}

fn decode_signature_b64(input: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .ok()
        .or_else(|| URL_SAFE.decode(input).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_types::{ADDRESS_PREFIX, LEGACY_ADDRESS_PREFIX};
    use serde_json::json;

    fn sample_envelope() -> Map<String, Value> {
        json!({
            "SERVER": "gts-test",
            "COMMAND": "UPDATE_CONFIG",
            "PAYLOAD": { "GIGI": "BUNA" },
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let identity = EdgeIdentity::generate();
        let signed = sign_envelope(&identity, sample_envelope());

        assert_eq!(
            signed.get(EE_HASH).and_then(Value::as_str),
            Some("feca4c4882b2b0cfb872c73bda948b77048ced67b9eeae10c8bdd9028f9d20a1")
        );
        assert!(verify_envelope(&signed));
    }

    #[test]
    fn test_legacy_sender_prefix_verifies() {
        let identity = EdgeIdentity::generate();
        let mut signed = sign_envelope(&identity, sample_envelope());

        let sender = signed.get(EE_SENDER).and_then(Value::as_str).unwrap();
        let legacy = sender.replacen(ADDRESS_PREFIX, LEGACY_ADDRESS_PREFIX, 1);
        signed.insert(EE_SENDER.to_string(), Value::String(legacy));

        assert!(verify_envelope(&signed));
    }

    #[test]
    fn test_tampered_hash_fails() {
        let identity = EdgeIdentity::generate();
        let mut signed = sign_envelope(&identity, sample_envelope());

        let hash = signed.get(EE_HASH).and_then(Value::as_str).unwrap();
        let flipped = if hash.starts_with('0') {
            format!("1{}", &hash[1..])
        } else {
            format!("0{}", &hash[1..])
        };
        signed.insert(EE_HASH.to_string(), Value::String(flipped));

        assert_eq!(
            verify_envelope_detailed(&signed),
            VerificationResult::HashMismatch
        );
    }

    #[test]
    fn test_tampered_payload_fails() {
        let identity = EdgeIdentity::generate();
        let mut signed = sign_envelope(&identity, sample_envelope());
        signed.insert("SERVER".to_string(), Value::String("other".to_string()));

        assert!(!verify_envelope(&signed));
    }

    #[test]
    fn test_wrong_sender_fails() {
        let identity = EdgeIdentity::generate();
        let other = EdgeIdentity::generate();
        let mut signed = sign_envelope(&identity, sample_envelope());
        signed.insert(
            EE_SENDER.to_string(),
            Value::String(other.address().as_str().to_string()),
        );

        assert_eq!(
            verify_envelope_detailed(&signed),
            VerificationResult::InvalidSignature
        );
    }

    #[test]
    fn test_missing_fields_fail() {
        let mut envelope = sample_envelope();
        assert_eq!(
            verify_envelope_detailed(&envelope),
            VerificationResult::MissingField(EE_SENDER)
        );

        envelope.insert(EE_SENDER.to_string(), Value::String("0xai_x".to_string()));
        assert_eq!(
            verify_envelope_detailed(&envelope),
            VerificationResult::MissingField(EE_SIGN)
        );
    }

    #[test]
    fn test_resigning_discards_previous_authority() {
        let identity = EdgeIdentity::generate();
        let signed_once = sign_envelope(&identity, sample_envelope());
        let signed_twice = sign_envelope(&identity, signed_once);

        assert!(verify_envelope(&signed_twice));
        assert_eq!(
            signed_twice.get(EE_HASH).and_then(Value::as_str),
            Some("feca4c4882b2b0cfb872c73bda948b77048ced67b9eeae10c8bdd9028f9d20a1")
        );
    }
}
