use lockstep_crypto::keys::{
    derive_transport_key, derive_vault_key, ecdsa_sign, ecdsa_verify, private_key_from_bytes,
    public_key_from_bytes, public_key_to_bytes, EcKeyPair, PUBLIC_KEY_LENGTH,
};

#[test]
fn public_key_encoding_is_compressed() {
    let pair = EcKeyPair::generate();
    let encoded = pair.public_key_bytes();
    assert_eq!(encoded.len(), PUBLIC_KEY_LENGTH);
    assert!(encoded[0] == 0x02 || encoded[0] == 0x03);
}

#[test]
fn public_key_roundtrip() {
    let pair = EcKeyPair::generate();
    let encoded = pair.public_key_bytes();
    let decoded = public_key_from_bytes(&encoded).unwrap();
    assert_eq!(public_key_to_bytes(&decoded), encoded);
}

#[test]
fn private_key_roundtrip() {
    let pair = EcKeyPair::generate();
    let encoded = pair.private_key_bytes();
    assert_eq!(encoded.len(), 32);
    let restored = EcKeyPair::from_private_key_bytes(encoded.as_bytes()).unwrap();
    assert_eq!(restored.public_key_bytes(), pair.public_key_bytes());
}

#[test]
fn rejects_malformed_keys() {
    assert!(public_key_from_bytes(&[0u8; 33]).is_err());
    assert!(public_key_from_bytes(b"short").is_err());
    assert!(private_key_from_bytes(&[0u8; 31]).is_err());
    // The zero scalar is not a valid private key.
    assert!(private_key_from_bytes(&[0u8; 32]).is_err());
}

#[test]
fn ecdh_agreement_is_symmetric() {
    let server = EcKeyPair::generate();
    let device = EcKeyPair::generate();

    let k1 = derive_transport_key(server.private_key(), device.public_key());
    let k2 = derive_transport_key(device.private_key(), server.public_key());
    assert_eq!(k1.as_bytes(), k2.as_bytes());
    assert_eq!(k1.len(), 16);
}

#[test]
fn transport_and_vault_keys_differ() {
    let server = EcKeyPair::generate();
    let device = EcKeyPair::generate();

    let transport = derive_transport_key(server.private_key(), device.public_key());
    let vault = derive_vault_key(server.private_key(), device.public_key());
    assert_ne!(transport.as_bytes(), vault.as_bytes());
}

#[test]
fn ecdsa_sign_verify() {
    let pair = EcKeyPair::generate();
    let data = b"KXHPM-NRALLA-ST24A-QEAAA";

    let signature = ecdsa_sign(pair.private_key(), data);
    assert!(ecdsa_verify(pair.public_key(), data, &signature));
    assert!(!ecdsa_verify(pair.public_key(), b"other data", &signature));

    let other = EcKeyPair::generate();
    assert!(!ecdsa_verify(other.public_key(), data, &signature));
}

#[test]
fn ecdsa_rejects_garbage_signature() {
    let pair = EcKeyPair::generate();
    assert!(!ecdsa_verify(pair.public_key(), b"data", b"not a signature"));
    assert!(!ecdsa_verify(pair.public_key(), b"data", &[]));
}
