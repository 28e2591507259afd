//! Online and offline signature verification.
//!
//! Online signatures are multi-factor decimal HMAC signatures over the
//! request data and the hash-based counter. Verification searches a bounded
//! look-ahead window of counter positions; a match advances the server
//! counter to the matched position, a miss counts a failed attempt and
//! blocks the activation at the threshold. Every attempt lands in the
//! signature audit log.

use crate::{Service, ServiceError, ServiceResult, PROTOCOL_VERSION};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use lockstep_crypto::{counter, keys, signature};
use lockstep_store::SignatureAuditRecord;
use lockstep_types::{
    ActivationId, ActivationStatus, ApplicationId, SignatureType,
    BLOCKED_REASON_MAX_FAILED_ATTEMPTS,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Marker byte for payloads signed with the application master key.
const KEY_MASTER_SERVER: char = '0';

/// Marker byte for payloads signed with the activation server key.
const KEY_SERVER_PERSONALIZED: char = '1';

/// Result of online and offline signature verification.
#[derive(Debug, Clone)]
pub struct VerifySignatureResponse {
    pub signature_valid: bool,
    pub activation_status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub activation_id: ActivationId,
    pub user_id: Option<String>,
    pub application_id: Option<ApplicationId>,
    pub signature_type: Option<SignatureType>,
    /// Attempts left before the activation blocks.
    pub remaining_attempts: Option<u64>,
}

/// Payload for offline (QR-delivered) signatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSignaturePayload {
    /// `data\n nonce\n key_type + ECDSA signature`, newline separated.
    pub offline_data: String,
    /// Base64 of the nonce baked into the payload.
    pub nonce: String,
}

impl Service {
    /// Verifies an online signature and maintains the failed-attempt
    /// counter of the activation.
    pub fn verify_signature(
        &self,
        activation_id: ActivationId,
        application_key: &str,
        data: &[u8],
        signature: &str,
        signature_type: SignatureType,
    ) -> ServiceResult<VerifySignatureResponse> {
        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;

        self.verify_signature_impl(activation_id, Some(version.application_id), data, signature, &[signature_type])
    }

    /// Shared verification core; `signature_types` lists the factor
    /// combinations allowed for this request (offline verification accepts
    /// more than one).
    fn verify_signature_impl(
        &self,
        activation_id: ActivationId,
        expected_application_id: Option<ApplicationId>,
        data: &[u8],
        signature: &str,
        signature_types: &[SignatureType],
    ) -> ServiceResult<VerifySignatureResponse> {
        let now = Utc::now();

        let Some(mut guard) = self.store().find_activation_with_lock(activation_id) else {
            // Unknown activations report REMOVED rather than an error so the
            // caller cannot distinguish them from removed ones.
            return Ok(VerifySignatureResponse {
                signature_valid: false,
                activation_status: ActivationStatus::Removed,
                blocked_reason: None,
                activation_id,
                user_id: None,
                application_id: None,
                signature_type: None,
                remaining_attempts: None,
            });
        };
        self.expire_pending_locked(&mut guard, now);

        if let Some(expected) = expected_application_id {
            if guard.application_id != expected {
                return Err(ServiceError::InvalidApplication);
            }
        }

        if guard.status != ActivationStatus::Active {
            let snapshot = guard.clone();
            drop(guard);
            self.audit_attempt(&snapshot, signature_types[0], signature, data, false, "activation_invalid_state");
            return Ok(VerifySignatureResponse {
                signature_valid: false,
                activation_status: snapshot.status,
                blocked_reason: snapshot.blocked_reason,
                activation_id,
                user_id: Some(snapshot.user_id),
                application_id: Some(snapshot.application_id),
                signature_type: None,
                remaining_attempts: None,
            });
        }

        let ctr_data = guard.ctr_data.ok_or(ServiceError::ActivationIncorrectState)?;
        let server_private = self.decrypt_server_private_key(&guard)?;
        let device_public_bytes = guard
            .device_public_key
            .clone()
            .ok_or(ServiceError::ActivationIncorrectState)?;
        let device_public = keys::public_key_from_bytes(&device_public_bytes)?;
        let shared_secret = keys::shared_secret(&server_private, &device_public);

        // Look-ahead search over counter positions.
        let mut matched: Option<(usize, [u8; 16], SignatureType)> = None;
        let lookahead = self.config().signature_validation_lookahead;
        'outer: for &candidate_type in signature_types {
            let mut candidate_ctr = ctr_data;
            for step in 1..=lookahead {
                candidate_ctr = counter::next_counter(&candidate_ctr);
                let expected = signature::compute_signature(
                    shared_secret.as_bytes(),
                    candidate_type,
                    data,
                    &candidate_ctr,
                );
                if signature::signatures_equal(&expected, signature) {
                    matched = Some((step as usize, candidate_ctr, candidate_type));
                    break 'outer;
                }
            }
        }

        match matched {
            Some((steps, new_ctr, matched_type)) => {
                guard.ctr_data = Some(new_ctr);
                guard.counter += steps as u64;
                guard.failed_attempts = 0;
                guard.last_used_at = now;
                let snapshot = guard.clone();
                drop(guard);

                self.audit_attempt(&snapshot, matched_type, signature, data, true, "signature_ok");
                Ok(VerifySignatureResponse {
                    signature_valid: true,
                    activation_status: snapshot.status,
                    blocked_reason: None,
                    activation_id,
                    user_id: Some(snapshot.user_id),
                    application_id: Some(snapshot.application_id),
                    signature_type: Some(matched_type),
                    remaining_attempts: Some(snapshot.max_failed_attempts),
                })
            }
            None => {
                guard.failed_attempts += 1;
                guard.last_used_at = now;
                let blocked = guard.failed_attempts >= guard.max_failed_attempts;
                if blocked {
                    guard.status = ActivationStatus::Blocked;
                    guard.blocked_reason = Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS.to_string());
                    guard.last_changed_at = Some(now);
                }
                let snapshot = guard.clone();
                drop(guard);

                if blocked {
                    self.store().append_activation_history(
                        activation_id,
                        ActivationStatus::Blocked,
                        Some(BLOCKED_REASON_MAX_FAILED_ATTEMPTS.to_string()),
                        None,
                    );
                    self.notify_callbacks(&snapshot);
                    info!(%activation_id, "activation blocked after failed signatures");
                }
                self.audit_attempt(&snapshot, signature_types[0], signature, data, false, "signature_does_not_match");

                Ok(VerifySignatureResponse {
                    signature_valid: false,
                    activation_status: snapshot.status,
                    blocked_reason: snapshot.blocked_reason.clone(),
                    activation_id,
                    user_id: Some(snapshot.user_id.clone()),
                    application_id: Some(snapshot.application_id),
                    signature_type: None,
                    remaining_attempts: Some(
                        snapshot.max_failed_attempts.saturating_sub(snapshot.failed_attempts),
                    ),
                })
            }
        }
    }

    /// Builds an offline signature payload signed with the activation
    /// server private key.
    pub fn create_personalized_offline_signature_payload(
        &self,
        activation_id: ActivationId,
        data: &str,
    ) -> ServiceResult<OfflineSignaturePayload> {
        let activation = self
            .store()
            .find_activation(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        let server_private = self.decrypt_server_private_key(&activation)?;
        Ok(build_offline_payload(data, KEY_SERVER_PERSONALIZED, &server_private))
    }

    /// Builds an offline signature payload signed with the application
    /// master private key.
    pub fn create_non_personalized_offline_signature_payload(
        &self,
        application_id: ApplicationId,
        data: &str,
    ) -> ServiceResult<OfflineSignaturePayload> {
        let master_key_pair = self
            .store()
            .latest_master_key_pair(application_id)
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        let master_private = keys::private_key_from_bytes(&master_key_pair.private_key)
            .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;
        Ok(build_offline_payload(data, KEY_MASTER_SERVER, &master_private))
    }

    /// Verifies an offline signature. The knowledge factor is always
    /// accepted; biometry participates only when explicitly allowed.
    pub fn verify_offline_signature(
        &self,
        activation_id: ActivationId,
        data: &[u8],
        signature: &str,
        allow_biometry: bool,
    ) -> ServiceResult<VerifySignatureResponse> {
        let mut types = vec![
            SignatureType::PossessionKnowledge,
            SignatureType::Possession,
        ];
        if allow_biometry {
            types.push(SignatureType::PossessionBiometry);
        }
        self.verify_signature_impl(activation_id, None, data, signature, &types)
    }

    /// Verifies a plain ECDSA signature made with the device private key.
    pub fn verify_ecdsa_signature(
        &self,
        activation_id: ActivationId,
        data: &[u8],
        signature: &[u8],
    ) -> ServiceResult<bool> {
        let activation = self
            .store()
            .find_activation(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }
        let device_public_bytes = activation
            .device_public_key
            .as_deref()
            .ok_or(ServiceError::ActivationIncorrectState)?;
        let device_public = keys::public_key_from_bytes(device_public_bytes)?;
        Ok(keys::ecdsa_verify(&device_public, data, signature))
    }

    /// Signature audit entries of one user within a time window.
    pub fn get_signature_audit_log(
        &self,
        user_id: &str,
        application_id: Option<ApplicationId>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<SignatureAuditRecord> {
        self.store().list_signature_audit(user_id, application_id, from, to)
    }

    fn audit_attempt(
        &self,
        activation: &lockstep_store::ActivationRecord,
        signature_type: SignatureType,
        signature: &str,
        data: &[u8],
        valid: bool,
        note: &str,
    ) {
        self.store().append_signature_audit(SignatureAuditRecord {
            id: 0,
            activation_id: activation.activation_id,
            application_id: activation.application_id,
            user_id: activation.user_id.clone(),
            counter: activation.counter,
            ctr_data: activation.ctr_data,
            signature_type,
            signature: signature.to_string(),
            data: data.to_vec(),
            valid,
            version: activation.version.unwrap_or(PROTOCOL_VERSION),
            note: note.to_string(),
            created_at: Utc::now(),
        });
    }
}

fn build_offline_payload(
    data: &str,
    key_type: char,
    signing_key: &lockstep_crypto::p256::SecretKey,
) -> OfflineSignaturePayload {
    let nonce = crate::activation::random_bytes(16);
    let nonce_b64 = BASE64.encode(&nonce);
    let signed_part = format!("{data}\n{nonce_b64}\n{key_type}");
    let ecdsa_signature = keys::ecdsa_sign(signing_key, signed_part.as_bytes());
    OfflineSignaturePayload {
        offline_data: format!("{signed_part}{}", BASE64.encode(ecdsa_signature)),
        nonce: nonce_b64,
    }
}

/// Computes a device-side online signature; the counterpart of
/// [`Service::verify_signature`] used by clients and tests.
#[must_use]
pub fn compute_online_signature(
    shared_secret: &[u8],
    signature_type: SignatureType,
    data: &[u8],
    ctr_data: &[u8; 16],
) -> String {
    let advanced = counter::next_counter(ctr_data);
    signature::compute_signature(shared_secret, signature_type, data, &advanced)
}
