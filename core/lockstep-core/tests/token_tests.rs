mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{active_activation, paired_activation, setup};
use lockstep_core::token::{compute_token_digest, TokenInfo};
use lockstep_core::ServiceError;
use lockstep_crypto::ecies::SH1_CREATE_TOKEN;
use lockstep_types::{SignatureType, TokenId};

#[test]
fn token_lifecycle() {
    let ctx = setup();
    let (activation_id, device, response) = active_activation(&ctx, "alice");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();

    // Create: the canonical request payload is "{}".
    let mut encryptor =
        ctx.activation_scope_encryptor(SH1_CREATE_TOKEN, &device, &server_public_key);
    let request = encryptor.encrypt_request(b"{}", true).unwrap();
    let response_cryptogram = ctx
        .service
        .create_token(
            activation_id,
            &ctx.application_key,
            SignatureType::Possession,
            &request,
        )
        .unwrap();

    let token_info: TokenInfo =
        serde_json::from_slice(&encryptor.decrypt_response(&response_cryptogram).unwrap()).unwrap();
    let token_id = TokenId::from_string(token_info.token_id.clone());
    let token_secret = BASE64.decode(&token_info.token_secret).unwrap();
    assert_eq!(token_secret.len(), 16);

    // Validate with a correct digest.
    let nonce = [9u8; 16];
    let timestamp = 1_700_000_000_000i64;
    let digest = compute_token_digest(&token_secret, &nonce, timestamp);
    let validated = ctx
        .service
        .validate_token(&token_id, &nonce, timestamp, &digest)
        .unwrap();
    assert!(validated.token_valid);
    assert_eq!(validated.activation_id, Some(activation_id));
    assert_eq!(validated.user_id.as_deref(), Some("alice"));
    assert_eq!(validated.signature_type, Some(SignatureType::Possession));

    // Any flipped input bit invalidates the digest.
    let mut bad_digest = digest;
    bad_digest[0] ^= 1;
    assert!(
        !ctx.service
            .validate_token(&token_id, &nonce, timestamp, &bad_digest)
            .unwrap()
            .token_valid
    );
    assert!(
        !ctx.service
            .validate_token(&token_id, &nonce, timestamp + 1, &digest)
            .unwrap()
            .token_valid
    );
    let mut bad_nonce = nonce;
    bad_nonce[5] ^= 0x40;
    assert!(
        !ctx.service
            .validate_token(&token_id, &bad_nonce, timestamp, &digest)
            .unwrap()
            .token_valid
    );

    // Remove, then validation reports an unknown token.
    assert!(ctx.service.remove_token(&token_id, activation_id));
    let after_removal = ctx
        .service
        .validate_token(&token_id, &nonce, timestamp, &digest)
        .unwrap();
    assert!(!after_removal.token_valid);
    assert!(after_removal.activation_id.is_none());
}

#[test]
fn create_token_requires_active_activation() {
    let ctx = setup();
    let (activation_id, device, response) = paired_activation(&ctx, "alice");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();

    let mut encryptor =
        ctx.activation_scope_encryptor(SH1_CREATE_TOKEN, &device, &server_public_key);
    let request = encryptor.encrypt_request(b"{}", true).unwrap();
    assert!(matches!(
        ctx.service.create_token(
            activation_id,
            &ctx.application_key,
            SignatureType::Possession,
            &request
        ),
        Err(ServiceError::ActivationIncorrectState)
    ));
}

#[test]
fn create_token_rejects_empty_payload() {
    let ctx = setup();
    let (activation_id, device, response) = active_activation(&ctx, "alice");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();

    let mut encryptor =
        ctx.activation_scope_encryptor(SH1_CREATE_TOKEN, &device, &server_public_key);
    let request = encryptor.encrypt_request(b"", true).unwrap();
    assert!(matches!(
        ctx.service.create_token(
            activation_id,
            &ctx.application_key,
            SignatureType::Possession,
            &request
        ),
        Err(ServiceError::DecryptionFailed)
    ));
}

#[test]
fn validate_token_fails_when_activation_blocked() {
    let ctx = setup();
    let (activation_id, device, response) = active_activation(&ctx, "alice");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();

    let mut encryptor =
        ctx.activation_scope_encryptor(SH1_CREATE_TOKEN, &device, &server_public_key);
    let request = encryptor.encrypt_request(b"{}", true).unwrap();
    let response_cryptogram = ctx
        .service
        .create_token(
            activation_id,
            &ctx.application_key,
            SignatureType::Possession,
            &request,
        )
        .unwrap();
    let token_info: TokenInfo =
        serde_json::from_slice(&encryptor.decrypt_response(&response_cryptogram).unwrap()).unwrap();
    let token_id = TokenId::from_string(token_info.token_id);
    let token_secret = BASE64.decode(&token_info.token_secret).unwrap();

    ctx.service
        .block_activation(activation_id, None, None)
        .unwrap();

    let digest = compute_token_digest(&token_secret, &[1u8; 16], 1);
    assert!(matches!(
        ctx.service.validate_token(&token_id, &[1u8; 16], 1, &digest),
        Err(ServiceError::ActivationIncorrectState)
    ));
}

#[test]
fn remove_token_checks_ownership() {
    let ctx = setup();
    let (activation_id, device, response) = active_activation(&ctx, "alice");
    let (other_activation, _, _) = active_activation(&ctx, "bob");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();

    let mut encryptor =
        ctx.activation_scope_encryptor(SH1_CREATE_TOKEN, &device, &server_public_key);
    let request = encryptor.encrypt_request(b"{}", true).unwrap();
    let response_cryptogram = ctx
        .service
        .create_token(
            activation_id,
            &ctx.application_key,
            SignatureType::Possession,
            &request,
        )
        .unwrap();
    let token_info: TokenInfo =
        serde_json::from_slice(&encryptor.decrypt_response(&response_cryptogram).unwrap()).unwrap();
    let token_id = TokenId::from_string(token_info.token_id);

    // Wrong activation: not removed.
    assert!(!ctx.service.remove_token(&token_id, other_activation));
    assert!(ctx.store.find_token(&token_id).is_some());

    // Right activation: removed, second call is idempotent.
    assert!(ctx.service.remove_token(&token_id, activation_id));
    assert!(!ctx.service.remove_token(&token_id, activation_id));
}

#[test]
fn create_token_for_unknown_activation_fails() {
    let ctx = setup();
    let request = lockstep_crypto::ecies::EciesCryptogram {
        ephemeral_public_key: Some(vec![2; 33]),
        mac: vec![0; 32],
        encrypted_data: vec![0; 16],
        nonce: None,
    };
    assert!(matches!(
        ctx.service.create_token(
            lockstep_types::ActivationId::generate(),
            &ctx.application_key,
            SignatureType::Possession,
            &request
        ),
        Err(ServiceError::ActivationNotFound)
    ));
}
