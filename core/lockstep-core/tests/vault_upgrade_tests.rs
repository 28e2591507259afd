mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{active_activation, setup};
use lockstep_core::signature::compute_online_signature;
use lockstep_core::upgrade::UpgradePayload;
use lockstep_core::vault::VaultUnlockPayload;
use lockstep_core::ServiceError;
use lockstep_crypto::at_rest::{EncryptedValue, EncryptionMode};
use lockstep_crypto::ecies::{SH1_UPGRADE, SH1_VAULT_UNLOCK};
use lockstep_crypto::keys::{self, EcKeyPair};
use lockstep_store::ActivationRecord;
use lockstep_types::{ActivationId, ActivationStatus, SignatureType};

#[test]
fn vault_unlock_returns_wrapped_vault_key() {
    let ctx = setup();
    let (activation_id, device, response) = active_activation(&ctx, "alice");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();
    let shared_secret = ctx.device_shared_secret(&device, &server_public_key);

    let mut ctr_data = [0u8; 16];
    ctr_data.copy_from_slice(&BASE64.decode(&response.ctr_data).unwrap());
    let data = b"POST&/pa/vault/unlock";
    let signature = compute_online_signature(
        &shared_secret,
        SignatureType::PossessionKnowledge,
        data,
        &ctr_data,
    );

    let mut encryptor =
        ctx.activation_scope_encryptor(SH1_VAULT_UNLOCK, &device, &server_public_key);
    let cryptogram = encryptor
        .encrypt_request(br#"{"reason":"ADD_BIOMETRY"}"#, true)
        .unwrap();

    let unlocked = ctx
        .service
        .vault_unlock(
            activation_id,
            &ctx.application_key,
            data,
            &signature,
            SignatureType::PossessionKnowledge,
            &cryptogram,
        )
        .unwrap();
    assert!(unlocked.signature_valid);

    let payload: VaultUnlockPayload = serde_json::from_slice(
        &encryptor
            .decrypt_response(&unlocked.cryptogram.unwrap())
            .unwrap(),
    )
    .unwrap();

    // The device can unwrap the vault key with its transport key.
    let server_public = keys::public_key_from_bytes(&server_public_key).unwrap();
    let transport_key = keys::derive_transport_key(device.private_key(), &server_public);
    let vault_key = keys::unwrap_key(
        &BASE64.decode(&payload.encrypted_vault_encryption_key).unwrap(),
        transport_key.as_bytes(),
    )
    .unwrap();

    let expected = keys::derive_vault_key(device.private_key(), &server_public);
    assert_eq!(vault_key.as_bytes(), expected.as_bytes());
}

#[test]
fn vault_unlock_with_bad_signature_returns_no_payload() {
    let ctx = setup();
    let (activation_id, device, response) = active_activation(&ctx, "alice");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();

    let mut encryptor =
        ctx.activation_scope_encryptor(SH1_VAULT_UNLOCK, &device, &server_public_key);
    let cryptogram = encryptor.encrypt_request(b"{}", true).unwrap();

    let unlocked = ctx
        .service
        .vault_unlock(
            activation_id,
            &ctx.application_key,
            b"data",
            "00000000",
            SignatureType::Possession,
            &cryptogram,
        )
        .unwrap();
    assert!(!unlocked.signature_valid);
    assert!(unlocked.cryptogram.is_none());
}

/// Fabricates a committed v2 activation (numeric counter only) directly in
/// the store, as a legacy record would look after migration.
fn insert_v2_activation(ctx: &common::TestContext, user_id: &str) -> (ActivationId, EcKeyPair, Vec<u8>) {
    let now = chrono::Utc::now();
    let device = EcKeyPair::generate();
    let server = EcKeyPair::generate();
    let activation_id = ActivationId::generate();

    let record = ActivationRecord {
        activation_id,
        application_id: ctx.application_id,
        user_id: user_id.to_string(),
        activation_name: Some("legacy device".to_string()),
        activation_code: lockstep_types::generate_code(),
        status: ActivationStatus::Active,
        blocked_reason: None,
        counter: 42,
        ctr_data: None,
        device_public_key: Some(device.public_key_bytes()),
        server_private_key: EncryptedValue {
            mode: EncryptionMode::NoEncryption,
            data: server.private_key_bytes().as_bytes().to_vec(),
        },
        server_public_key: server.public_key_bytes(),
        failed_attempts: 0,
        max_failed_attempts: 5,
        expires_at: now,
        created_at: now,
        last_used_at: now,
        last_changed_at: None,
        master_keypair_id: 1,
        version: Some(2),
        extras: None,
        flags: Vec::new(),
    };
    ctx.store.insert_activation(record).unwrap();
    (activation_id, device, server.public_key_bytes())
}

#[test]
fn upgrade_initializes_counter_and_commits() {
    let ctx = setup();
    let (activation_id, device, server_public_key) = insert_v2_activation(&ctx, "alice");

    let mut encryptor = ctx.activation_scope_encryptor(SH1_UPGRADE, &device, &server_public_key);
    let cryptogram = encryptor.encrypt_request(b"{}", true).unwrap();
    let response = ctx
        .service
        .start_upgrade(activation_id, &ctx.application_key, &cryptogram)
        .unwrap();

    let payload: UpgradePayload =
        serde_json::from_slice(&encryptor.decrypt_response(&response).unwrap()).unwrap();
    let ctr_data = BASE64.decode(&payload.ctr_data).unwrap();
    assert_eq!(ctr_data.len(), 16);

    // The record now carries both counters; the version is still 2.
    let record = ctx.store.find_activation(activation_id).unwrap();
    assert_eq!(record.counter, 42);
    assert_eq!(record.ctr_data.unwrap().to_vec(), ctr_data);
    assert_eq!(record.version, Some(2));

    // Start is idempotent: a retry returns the same counter state.
    let mut encryptor2 = ctx.activation_scope_encryptor(SH1_UPGRADE, &device, &server_public_key);
    let cryptogram2 = encryptor2.encrypt_request(b"{}", true).unwrap();
    let retry = ctx
        .service
        .start_upgrade(activation_id, &ctx.application_key, &cryptogram2)
        .unwrap();
    let retry_payload: UpgradePayload =
        serde_json::from_slice(&encryptor2.decrypt_response(&retry).unwrap()).unwrap();
    assert_eq!(retry_payload.ctr_data, payload.ctr_data);

    let committed = ctx
        .service
        .commit_upgrade(activation_id, &ctx.application_key)
        .unwrap();
    assert!(committed.committed);
    let record = ctx.store.find_activation(activation_id).unwrap();
    assert_eq!(record.version, Some(3));
    assert_eq!(record.counter, 42);
}

#[test]
fn commit_upgrade_requires_started_upgrade() {
    let ctx = setup();
    let (activation_id, _, _) = insert_v2_activation(&ctx, "alice");
    assert!(matches!(
        ctx.service.commit_upgrade(activation_id, &ctx.application_key),
        Err(ServiceError::ActivationIncorrectState)
    ));
}

#[test]
fn upgrade_rejects_v3_activations() {
    let ctx = setup();
    let (activation_id, device, response) = active_activation(&ctx, "alice");
    let server_public_key = BASE64.decode(&response.server_public_key).unwrap();

    let mut encryptor = ctx.activation_scope_encryptor(SH1_UPGRADE, &device, &server_public_key);
    let cryptogram = encryptor.encrypt_request(b"{}", true).unwrap();
    assert!(matches!(
        ctx.service
            .start_upgrade(activation_id, &ctx.application_key, &cryptogram),
        Err(ServiceError::ActivationIncorrectState)
    ));
}
