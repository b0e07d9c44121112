//! Signature, hash and address invariants, pinned against the protocol
//! vectors.

use edgelink_crypto::{
    decrypt_from, encrypt_for, sign_envelope, stable_hash_hex, verify_envelope, EdgeIdentity,
};
use edgelink_types::envelope::{EE_HASH, EE_SENDER};
use edgelink_types::{Address, ADDRESS_PREFIX, LEGACY_ADDRESS_PREFIX};
use serde_json::{json, Map, Value};

const KNOWN_HASH: &str = "feca4c4882b2b0cfb872c73bda948b77048ced67b9eeae10c8bdd9028f9d20a1";

fn sample() -> Map<String, Value> {
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
fn sign_produces_known_hash_and_reverifies() {
    let identity = EdgeIdentity::generate();
    let signed = sign_envelope(&identity, sample());

    assert_eq!(signed.get(EE_HASH).and_then(Value::as_str), Some(KNOWN_HASH));
    assert!(verify_envelope(&signed));
}

#[test]
fn legacy_prefix_still_verifies() {
    let identity = EdgeIdentity::generate();
    let mut signed = sign_envelope(&identity, sample());

    let sender = signed
        .get(EE_SENDER)
        .and_then(Value::as_str)
        .unwrap()
        .replacen(ADDRESS_PREFIX, LEGACY_ADDRESS_PREFIX, 1);
    signed.insert(EE_SENDER.to_string(), Value::String(sender));

    assert!(verify_envelope(&signed));
}

#[test]
fn tampered_hash_fails_verification() {
    let identity = EdgeIdentity::generate();
    let mut signed = sign_envelope(&identity, sample());

    let hash = signed.get(EE_HASH).and_then(Value::as_str).unwrap();
    let tampered = if hash.starts_with('f') {
        format!("e{}", &hash[1..])
    } else {
        format!("f{}", &hash[1..])
    };
    signed.insert(EE_HASH.to_string(), Value::String(tampered));

    assert!(!verify_envelope(&signed));
}

#[test]
fn mutating_any_data_byte_flips_verification() {
    let identity = EdgeIdentity::generate();
    let signed = sign_envelope(&identity, sample());

    let mut tampered = signed.clone();
    tampered.insert("SERVER".to_string(), json!("gts-tesT"));
    assert!(!verify_envelope(&tampered));

    let mut tampered = signed;
    tampered.insert("PAYLOAD".to_string(), json!({ "GIGI": "buna" }));
    assert!(!verify_envelope(&tampered));
}

#[test]
fn stable_hash_ignores_insertion_order() {
    let a = json!({ "Z": [1, 2], "A": { "M": 1, "B": 2 } });
    let b = json!({ "A": { "B": 2, "M": 1 }, "Z": [1, 2] });
    assert_eq!(stable_hash_hex(&a), stable_hash_hex(&b));
}

#[test]
fn stable_hash_ignores_wire_key_order() {
    // Same content parsed from differently ordered wire text hashes
    // identically, at every depth.
    let orderings = [
        r#"{"B":{"Y":2,"X":[{"K":1,"J":2}]},"A":1}"#,
        r#"{"A":1,"B":{"X":[{"J":2,"K":1}],"Y":2}}"#,
        r#"{"B":{"X":[{"K":1,"J":2}],"Y":2},"A":1}"#,
    ];
    let hashes: Vec<String> = orderings
        .iter()
        .map(|text| stable_hash_hex(&serde_json::from_str(text).unwrap()))
        .collect();
    assert_eq!(hashes[0], hashes[1]);
    assert_eq!(hashes[1], hashes[2]);
}

#[test]
fn encrypt_decrypt_round_trip_between_roles() {
    let client = EdgeIdentity::generate();
    let node = EdgeIdentity::generate();

    let blob = encrypt_for(&client, &node.address(), b"{\"ACTION\":\"X\"}").unwrap();
    let plain = decrypt_from(&node, &client.address(), &blob).unwrap();
    assert_eq!(plain, b"{\"ACTION\":\"X\"}");

    // A third identity cannot read it.
    let eve = EdgeIdentity::generate();
    assert!(decrypt_from(&eve, &client.address(), &blob).is_none());
}

#[test]
fn address_canonicalization_round_trip() {
    for _ in 0..8 {
        let identity = EdgeIdentity::generate();
        let address = identity.address();
        let bytes = address.compressed_bytes();
        assert_eq!(Address::from_compressed_bytes(&bytes), address);
        assert_eq!(Address::parse(address.as_str()).unwrap(), address);
    }
}
