//! Property-based tests for the crypto engine.
//!
//! Verifies the properties the service layer relies on:
//! - ECIES decrypt(encrypt(p)) = p for any plaintext
//! - any single-byte tampering is rejected
//! - the X9.63 KDF produces exactly the requested length, deterministically
//! - the at-rest codec is bound to its context

use lockstep_crypto::at_rest::{record_context, KeyAtRestCodec};
use lockstep_crypto::ecies::{
    shared_info2_application, EciesDecryptor, EciesEncryptor, SH1_ACTIVATION_LAYER_2,
};
use lockstep_crypto::kdf::{constant_time_eq, kdf_internal, kdf_x963};
use lockstep_crypto::keys::EcKeyPair;
use proptest::prelude::*;

fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2000)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// ECIES roundtrip preserves any plaintext, with and without nonce.
    #[test]
    fn ecies_roundtrip(plaintext in plaintext_strategy(), with_nonce in any::<bool>()) {
        let server = EcKeyPair::generate();
        let sh2 = shared_info2_application(b"app-secret");

        let mut encryptor =
            EciesEncryptor::new(*server.public_key(), SH1_ACTIVATION_LAYER_2, sh2);
        let mut decryptor =
            EciesDecryptor::new(server.private_key().clone(), SH1_ACTIVATION_LAYER_2, sh2);

        let cryptogram = encryptor.encrypt_request(&plaintext, with_nonce).unwrap();
        let decrypted = decryptor.decrypt_request(&cryptogram).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    /// Flipping any single bit of mac or ciphertext breaks decryption.
    #[test]
    fn ecies_tamper_detection(
        plaintext in plaintext_strategy(),
        byte_pos in any::<usize>(),
        bit in 0u8..8,
        in_mac in any::<bool>(),
    ) {
        let server = EcKeyPair::generate();
        let sh2 = shared_info2_application(b"app-secret");

        let mut encryptor =
            EciesEncryptor::new(*server.public_key(), SH1_ACTIVATION_LAYER_2, sh2);
        let mut decryptor =
            EciesDecryptor::new(server.private_key().clone(), SH1_ACTIVATION_LAYER_2, sh2);

        let mut cryptogram = encryptor.encrypt_request(&plaintext, false).unwrap();
        if in_mac {
            let pos = byte_pos % cryptogram.mac.len();
            cryptogram.mac[pos] ^= 1 << bit;
        } else {
            let pos = byte_pos % cryptogram.encrypted_data.len();
            cryptogram.encrypted_data[pos] ^= 1 << bit;
        }
        prop_assert!(decryptor.decrypt_request(&cryptogram).is_err());
    }

    /// Responses roundtrip through the client for any payload.
    #[test]
    fn ecies_response_roundtrip(request in plaintext_strategy(), response in plaintext_strategy()) {
        let server = EcKeyPair::generate();
        let sh2 = shared_info2_application(b"app-secret");

        let mut encryptor =
            EciesEncryptor::new(*server.public_key(), SH1_ACTIVATION_LAYER_2, sh2);
        let mut decryptor =
            EciesDecryptor::new(server.private_key().clone(), SH1_ACTIVATION_LAYER_2, sh2);

        let cryptogram = encryptor.encrypt_request(&request, true).unwrap();
        decryptor.decrypt_request(&cryptogram).unwrap();

        let response_cryptogram = decryptor.encrypt_response(&response).unwrap();
        let decrypted = encryptor.decrypt_response(&response_cryptogram).unwrap();
        prop_assert_eq!(decrypted, response);
    }

    /// The X9.63 KDF is deterministic and honors the requested length.
    #[test]
    fn kdf_x963_shape(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        info in prop::collection::vec(any::<u8>(), 0..64),
        length in 1usize..128,
    ) {
        let a = kdf_x963(&secret, &info, length);
        let b = kdf_x963(&secret, &info, length);
        prop_assert_eq!(a.as_bytes(), b.as_bytes());
        prop_assert_eq!(a.len(), length);
    }

    /// Different derivation indexes give different keys.
    #[test]
    fn kdf_internal_separates_indexes(
        key in prop::collection::vec(any::<u8>(), 16..64),
        i in 0u64..10_000,
        j in 0u64..10_000,
    ) {
        prop_assume!(i != j);
        let a = kdf_internal(&key, i);
        let b = kdf_internal(&key, j);
        prop_assert_ne!(a.as_bytes(), b.as_bytes());
    }

    /// The at-rest codec roundtrips under its own context and rejects others.
    #[test]
    fn at_rest_context_binding(
        secret in prop::collection::vec(any::<u8>(), 1..128),
        user in "[a-z]{1,16}",
        other_user in "[a-z]{1,16}",
    ) {
        prop_assume!(user != other_user);

        let codec = KeyAtRestCodec::new(Some(b"master-secret-for-property-tests"));
        let context = record_context(&[&user, "activation-1"]);
        let value = codec.encrypt(&context, &secret);

        let decrypted = codec.decrypt(&context, &value).unwrap();
        prop_assert_eq!(decrypted.as_bytes(), &secret[..]);

        let wrong = record_context(&[&other_user, "activation-1"]);
        prop_assert!(codec.decrypt(&wrong, &value).is_err());
    }

    /// Constant-time equality agrees with plain equality.
    #[test]
    fn constant_time_eq_matches(a in plaintext_strategy(), b in plaintext_strategy()) {
        prop_assert_eq!(constant_time_eq(&a, &b), a == b);
        prop_assert!(constant_time_eq(&a, &a));
    }
}
