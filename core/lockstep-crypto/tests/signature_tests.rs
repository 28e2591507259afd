use lockstep_crypto::counter::init_counter;
use lockstep_crypto::signature::{
    compute_signature, derive_factor_key, fingerprint_v2, fingerprint_v3, signatures_equal,
};
use lockstep_types::{SignatureFactor, SignatureType};

const SHARED: &[u8] = &[11u8; 32];

#[test]
fn signature_has_one_group_per_factor() {
    let ctr = init_counter();
    let one = compute_signature(SHARED, SignatureType::Possession, b"data", &ctr);
    let two = compute_signature(SHARED, SignatureType::PossessionKnowledge, b"data", &ctr);
    let three =
        compute_signature(SHARED, SignatureType::PossessionKnowledgeBiometry, b"data", &ctr);

    assert_eq!(one.len(), 8);
    assert_eq!(two.len(), 17);
    assert_eq!(three.len(), 26);
    for group in three.split('-') {
        assert_eq!(group.len(), 8);
        assert!(group.bytes().all(|b| b.is_ascii_digit()));
    }
}

#[test]
fn signature_is_deterministic() {
    let ctr = init_counter();
    let a = compute_signature(SHARED, SignatureType::Possession, b"data", &ctr);
    let b = compute_signature(SHARED, SignatureType::Possession, b"data", &ctr);
    assert_eq!(a, b);
}

#[test]
fn signature_depends_on_every_input() {
    let ctr = init_counter();
    let base = compute_signature(SHARED, SignatureType::Possession, b"data", &ctr);

    let other_data = compute_signature(SHARED, SignatureType::Possession, b"datb", &ctr);
    assert_ne!(base, other_data);

    let other_ctr = compute_signature(SHARED, SignatureType::Possession, b"data", &init_counter());
    assert_ne!(base, other_ctr);

    let other_secret =
        compute_signature(&[12u8; 32], SignatureType::Possession, b"data", &ctr);
    assert_ne!(base, other_secret);
}

#[test]
fn factor_keys_are_distinct() {
    let possession = derive_factor_key(SHARED, SignatureFactor::Possession);
    let knowledge = derive_factor_key(SHARED, SignatureFactor::Knowledge);
    let biometry = derive_factor_key(SHARED, SignatureFactor::Biometry);
    assert_ne!(possession.as_bytes(), knowledge.as_bytes());
    assert_ne!(knowledge.as_bytes(), biometry.as_bytes());
}

#[test]
fn first_group_is_shared_across_types() {
    // The possession group must not depend on which other factors follow.
    let ctr = init_counter();
    let one = compute_signature(SHARED, SignatureType::Possession, b"data", &ctr);
    let two = compute_signature(SHARED, SignatureType::PossessionKnowledge, b"data", &ctr);
    assert_eq!(one, two.split('-').next().unwrap());
}

#[test]
fn signatures_equal_is_exact() {
    assert!(signatures_equal("12345678", "12345678"));
    assert!(!signatures_equal("12345678", "12345679"));
    assert!(!signatures_equal("12345678", "1234567"));
}

#[test]
fn fingerprints_are_eight_digits() {
    let device = [2u8; 33];
    let server = [3u8; 33];

    let v2 = fingerprint_v2(&device);
    assert_eq!(v2.len(), 8);
    assert!(v2.bytes().all(|b| b.is_ascii_digit()));

    let v3 = fingerprint_v3(&device, &server, "7e9b1a4e-0001-4a1b-9e6d-1f2a3b4c5d6e");
    assert_eq!(v3.len(), 8);
    assert!(v3.bytes().all(|b| b.is_ascii_digit()));
}

#[test]
fn v3_fingerprint_binds_activation_id() {
    let device = [2u8; 33];
    let server = [3u8; 33];
    let a = fingerprint_v3(&device, &server, "activation-a");
    let b = fingerprint_v3(&device, &server, "activation-b");
    assert_ne!(a, b);
}
