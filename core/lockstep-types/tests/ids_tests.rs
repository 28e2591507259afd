use lockstep_types::{ActivationId, ApplicationId, TokenId};

#[test]
fn activation_id_roundtrips_through_string() {
    let id = ActivationId::generate();
    let parsed = ActivationId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn activation_id_rejects_garbage() {
    assert!(ActivationId::parse("not-a-uuid").is_err());
}

#[test]
fn activation_ids_are_unique() {
    let a = ActivationId::generate();
    let b = ActivationId::generate();
    assert_ne!(a, b);
}

#[test]
fn activation_id_serde_is_transparent() {
    let id = ActivationId::generate();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let back: ActivationId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
}

#[test]
fn token_id_is_base64url_of_16_bytes() {
    let id = TokenId::generate();
    // 16 bytes -> 22 base64url chars without padding.
    assert_eq!(id.as_str().len(), 22);
    assert!(id
        .as_str()
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
}

#[test]
fn token_ids_are_unique_in_sample() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..1000 {
        assert!(seen.insert(TokenId::generate()));
    }
}

#[test]
fn application_id_display() {
    assert_eq!(ApplicationId(42).to_string(), "42");
}
