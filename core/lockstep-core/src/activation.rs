//! Activation lifecycle state machine.
//!
//! States move `CREATED → OTP_USED → ACTIVE ↔ BLOCKED`, with `REMOVED` as
//! the terminal sink reachable from anywhere. Pending activations
//! (`CREATED`, `OTP_USED`) expire lazily: any read that touches an expired
//! pending activation upgrades to a row lock, sinks it to `REMOVED`, logs
//! history and notifies callbacks before answering.

use crate::recovery::ActivationRecovery;
use crate::{Service, ServiceError, ServiceResult, PROTOCOL_VERSION};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use lockstep_crypto::ecies::{
    shared_info2_application, EciesCryptogram, EciesDecryptor, SH1_ACTIVATION_LAYER_2,
};
use lockstep_crypto::{counter, keys, signature, status_blob};
use lockstep_store::{ActivationGuard, ActivationHistoryRecord, ActivationRecord, MasterKeyPair};
use lockstep_types::{
    generate_code, validate_code, ActivationId, ActivationStatus, ApplicationId,
    BLOCKED_REASON_NOT_SPECIFIED,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Inner (layer-2) payload of an activation request, carried inside the
/// ECIES envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationLayer2Request {
    /// Base64 of the device public key (compressed point).
    pub device_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<String>,
}

/// Inner (layer-2) payload of an activation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationLayer2Response {
    pub activation_id: String,
    /// Base64 of the initial hash-based counter state.
    pub ctr_data: String,
    /// Base64 of the server public key (compressed point).
    pub server_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_recovery: Option<ActivationRecovery>,
}

/// Result of `init`.
#[derive(Debug, Clone)]
pub struct InitActivationResponse {
    pub activation_id: ActivationId,
    pub activation_code: String,
    /// ECDSA signature of the activation code by the master private key.
    pub activation_signature: Vec<u8>,
    pub user_id: String,
    pub application_id: ApplicationId,
}

/// Result of `prepare`.
#[derive(Debug)]
pub struct PrepareActivationResponse {
    pub activation_id: ActivationId,
    pub user_id: String,
    pub cryptogram: EciesCryptogram,
}

/// Result of `create`.
#[derive(Debug)]
pub struct CreateActivationResponse {
    pub activation_id: ActivationId,
    pub user_id: String,
    pub cryptogram: EciesCryptogram,
}

/// Result of `commit`.
#[derive(Debug, Clone)]
pub struct CommitActivationResponse {
    pub activation_id: ActivationId,
    pub activated: bool,
}

/// Result of `block`.
#[derive(Debug, Clone)]
pub struct BlockActivationResponse {
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
}

/// Result of `unblock`.
#[derive(Debug, Clone)]
pub struct UnblockActivationResponse {
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
}

/// Result of `remove`.
#[derive(Debug, Clone)]
pub struct RemoveActivationResponse {
    pub activation_id: ActivationId,
    pub removed: bool,
}

/// One activation in a list or lookup response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationListItem {
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub activation_name: Option<String>,
    pub extras: Option<String>,
    pub user_id: String,
    pub application_id: ApplicationId,
    pub application_name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub last_changed_at: Option<DateTime<Utc>>,
    /// 0 when the protocol version is not known yet.
    pub version: u8,
}

/// Result of `get_status`.
#[derive(Debug, Clone)]
pub struct GetActivationStatusResponse {
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub activation_name: Option<String>,
    pub user_id: String,
    pub extras: Option<String>,
    pub application_id: Option<ApplicationId>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    /// The encrypted status blob (32 bytes), random for unpaired states.
    pub encrypted_status_blob: Vec<u8>,
    /// Nonce accompanying the blob when the caller sent a challenge.
    pub status_blob_nonce: Option<Vec<u8>>,
    /// Present only in `CREATED`, so the device can complete pairing.
    pub activation_code: Option<String>,
    /// Master-key signature of the activation code, present with it.
    pub activation_signature: Option<Vec<u8>>,
    pub device_public_key_fingerprint: Option<String>,
    /// 0 when the protocol version is not known yet.
    pub version: u8,
}

impl Service {
    /// Initializes a new activation in `CREATED` state.
    pub fn init_activation(
        &self,
        application_id: ApplicationId,
        user_id: &str,
        max_failure_count: Option<u64>,
        expire_at: Option<DateTime<Utc>>,
    ) -> ServiceResult<InitActivationResponse> {
        let now = Utc::now();

        if user_id.is_empty() || user_id.len() > 255 {
            warn!("user ID not specified or invalid");
            return Err(ServiceError::NoUserId);
        }
        if application_id.0 == 0 {
            warn!("application ID not specified");
            return Err(ServiceError::NoApplicationId);
        }

        let max_failed_attempts =
            max_failure_count.unwrap_or(self.config().default_max_failed_attempts);
        let expires_at = expire_at.unwrap_or(now + self.config().activation_validity);

        let master_key_pair = self
            .store()
            .latest_master_key_pair(application_id)
            .ok_or_else(|| {
                warn!(%application_id, "no master key pair for application");
                ServiceError::NoMasterServerKeypair
            })?;
        let master_private = keys::private_key_from_bytes(&master_key_pair.private_key)
            .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;

        // Rejection sampling for a unique activation ID.
        let mut activation_id = None;
        for _ in 0..self.config().activation_id_iterations {
            let candidate = ActivationId::generate();
            if !self.store().activation_exists(candidate) {
                activation_id = Some(candidate);
                break;
            }
        }
        let activation_id = activation_id.ok_or(ServiceError::UnableToGenerateActivationId)?;

        // Same policy for the activation code, scoped to the application.
        let mut activation_code = None;
        for _ in 0..self.config().activation_code_iterations {
            let candidate = generate_code();
            if !self.store().activation_code_in_use(application_id, &candidate) {
                activation_code = Some(candidate);
                break;
            }
        }
        let activation_code = activation_code.ok_or(ServiceError::UnableToGenerateActivationCode)?;

        let activation_signature = keys::ecdsa_sign(&master_private, activation_code.as_bytes());

        let server_key_pair = keys::EcKeyPair::generate();
        let server_private_key = self.encrypt_server_private_key(
            &server_key_pair,
            user_id,
            activation_id,
        );

        let record = ActivationRecord {
            activation_id,
            application_id,
            user_id: user_id.to_string(),
            activation_name: None,
            activation_code: activation_code.clone(),
            status: ActivationStatus::Created,
            blocked_reason: None,
            counter: 0,
            ctr_data: None,
            device_public_key: None,
            server_private_key,
            server_public_key: server_key_pair.public_key_bytes(),
            failed_attempts: 0,
            max_failed_attempts,
            expires_at,
            created_at: now,
            last_used_at: now,
            last_changed_at: None,
            master_keypair_id: master_key_pair.id,
            version: None,
            extras: None,
            flags: Vec::new(),
        };
        self.store().insert_activation(record.clone())?;
        self.store().append_activation_history(
            activation_id,
            ActivationStatus::Created,
            None,
            None,
        );
        self.notify_callbacks(&record);
        info!(%activation_id, user_id, "activation initialized");

        Ok(InitActivationResponse {
            activation_id,
            activation_code,
            activation_signature,
            user_id: user_id.to_string(),
            application_id,
        })
    }

    /// Completes the key exchange for an activation located by its code.
    pub fn prepare_activation(
        &self,
        activation_code: &str,
        application_key: &str,
        cryptogram: &EciesCryptogram,
    ) -> ServiceResult<PrepareActivationResponse> {
        let now = Utc::now();

        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or_else(|| {
                warn!(activation_code, "unsupported application version");
                ServiceError::ActivationExpired
            })?;
        let application_id = version.application_id;

        let master_key_pair = self
            .store()
            .latest_master_key_pair(application_id)
            .ok_or(ServiceError::NoMasterServerKeypair)?;

        let mut decryptor = self.application_scope_decryptor(&master_key_pair, &version.application_secret)?;
        let request_bytes = decryptor.decrypt_request(cryptogram)?;
        let request: ActivationLayer2Request = serde_json::from_slice(&request_bytes)
            .map_err(|_| ServiceError::InvalidInputFormat)?;

        // Locate by code without a lock, then re-acquire by id under lock.
        let snapshot = self
            .store()
            .find_created_activation(application_id, activation_code)
            .ok_or_else(|| {
                warn!(activation_code, "activation not found for code");
                ServiceError::ActivationNotFound
            })?;
        let mut guard = self
            .store()
            .find_activation_with_lock(snapshot.activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;

        self.expire_pending_locked(&mut guard, now);
        self.validate_created_activation(&guard, application_id)?;

        let recovery = self.complete_key_exchange(&mut guard, &request, now)?;
        let response = self.layer2_response(&guard, recovery)?;
        let activation_id = guard.activation_id;
        let user_id = guard.user_id.clone();
        drop(guard);

        let response_bytes =
            serde_json::to_vec(&response).map_err(|e| ServiceError::Unknown(e.to_string()))?;
        let cryptogram = decryptor.encrypt_response(&response_bytes)?;

        info!(%activation_id, "activation prepared");
        Ok(PrepareActivationResponse {
            activation_id,
            user_id,
            cryptogram,
        })
    }

    /// Creates and completes an activation for a known user in one call.
    pub fn create_activation(
        &self,
        user_id: &str,
        expire_at: Option<DateTime<Utc>>,
        max_failure_count: Option<u64>,
        application_key: &str,
        cryptogram: &EciesCryptogram,
    ) -> ServiceResult<CreateActivationResponse> {
        let now = Utc::now();

        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or_else(|| {
                warn!(application_key, "unsupported application version");
                ServiceError::InvalidApplication
            })?;
        let application_id = version.application_id;

        let init = self.init_activation(application_id, user_id, max_failure_count, expire_at)?;
        let mut guard = self
            .store()
            .find_activation_with_lock(init.activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;

        self.expire_pending_locked(&mut guard, now);
        self.validate_created_activation(&guard, application_id)?;

        let master_key_pair = self
            .store()
            .latest_master_key_pair(application_id)
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        let mut decryptor =
            self.application_scope_decryptor(&master_key_pair, &version.application_secret)?;
        let request_bytes = decryptor.decrypt_request(cryptogram)?;
        let request: ActivationLayer2Request = serde_json::from_slice(&request_bytes)
            .map_err(|_| ServiceError::InvalidInputFormat)?;

        let recovery = self.complete_key_exchange(&mut guard, &request, now)?;
        let response = self.layer2_response(&guard, recovery)?;
        let activation_id = guard.activation_id;
        let user_id = guard.user_id.clone();
        drop(guard);

        let response_bytes =
            serde_json::to_vec(&response).map_err(|e| ServiceError::Unknown(e.to_string()))?;
        let cryptogram = decryptor.encrypt_response(&response_bytes)?;

        info!(%activation_id, "activation created");
        Ok(CreateActivationResponse {
            activation_id,
            user_id,
            cryptogram,
        })
    }

    /// Commits an activation after the master back-end confirmed it.
    pub fn commit_activation(
        &self,
        activation_id: ActivationId,
        external_user_id: Option<&str>,
    ) -> ServiceResult<CommitActivationResponse> {
        let now = Utc::now();
        let mut guard = self
            .store()
            .find_activation_with_lock(activation_id)
            .ok_or_else(|| {
                info!(%activation_id, "activation does not exist");
                ServiceError::ActivationNotFound
            })?;

        self.expire_pending_locked(&mut guard, now);
        if guard.status == ActivationStatus::Removed {
            info!(%activation_id, "activation is already removed");
            return Err(ServiceError::ActivationExpired);
        }
        if guard.status != ActivationStatus::OtpUsed {
            info!(%activation_id, status = ?guard.status, "commit in incorrect state");
            return Err(ServiceError::ActivationIncorrectState);
        }

        guard.status = ActivationStatus::Active;
        guard.last_changed_at = Some(now);
        let snapshot = guard.clone();
        drop(guard);

        self.store().append_activation_history(
            activation_id,
            ActivationStatus::Active,
            None,
            external_user_id.map(str::to_string),
        );
        self.notify_callbacks(&snapshot);
        self.activate_recovery_codes(&snapshot, now);

        info!(%activation_id, "activation committed");
        Ok(CommitActivationResponse {
            activation_id,
            activated: true,
        })
    }

    /// Blocks an active activation. Blocking an already blocked activation
    /// is a no-op.
    pub fn block_activation(
        &self,
        activation_id: ActivationId,
        reason: Option<&str>,
        external_user_id: Option<&str>,
    ) -> ServiceResult<BlockActivationResponse> {
        let mut guard = self
            .store()
            .find_activation_with_lock(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;

        if guard.status == ActivationStatus::Active {
            guard.status = ActivationStatus::Blocked;
            guard.blocked_reason =
                Some(reason.unwrap_or(BLOCKED_REASON_NOT_SPECIFIED).to_string());
            guard.last_changed_at = Some(Utc::now());
            let snapshot = guard.clone();
            drop(guard);

            self.store().append_activation_history(
                activation_id,
                ActivationStatus::Blocked,
                snapshot.blocked_reason.clone(),
                external_user_id.map(str::to_string),
            );
            self.notify_callbacks(&snapshot);
            info!(%activation_id, "activation blocked");
            return Ok(BlockActivationResponse {
                activation_id,
                status: snapshot.status,
                blocked_reason: snapshot.blocked_reason,
            });
        }

        if guard.status != ActivationStatus::Blocked {
            info!(%activation_id, status = ?guard.status, "block in incorrect state");
            return Err(ServiceError::ActivationIncorrectState);
        }
        Ok(BlockActivationResponse {
            activation_id,
            status: guard.status,
            blocked_reason: guard.blocked_reason.clone(),
        })
    }

    /// Unblocks a blocked activation, resetting its failed attempts.
    /// Unblocking an already active activation is a no-op.
    pub fn unblock_activation(
        &self,
        activation_id: ActivationId,
        external_user_id: Option<&str>,
    ) -> ServiceResult<UnblockActivationResponse> {
        let mut guard = self
            .store()
            .find_activation_with_lock(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;

        if guard.status == ActivationStatus::Blocked {
            guard.status = ActivationStatus::Active;
            guard.blocked_reason = None;
            guard.failed_attempts = 0;
            guard.last_changed_at = Some(Utc::now());
            let snapshot = guard.clone();
            drop(guard);

            self.store().append_activation_history(
                activation_id,
                ActivationStatus::Active,
                None,
                external_user_id.map(str::to_string),
            );
            self.notify_callbacks(&snapshot);
            info!(%activation_id, "activation unblocked");
            return Ok(UnblockActivationResponse {
                activation_id,
                status: snapshot.status,
            });
        }

        if guard.status != ActivationStatus::Active {
            info!(%activation_id, status = ?guard.status, "unblock in incorrect state");
            return Err(ServiceError::ActivationIncorrectState);
        }
        Ok(UnblockActivationResponse {
            activation_id,
            status: guard.status,
        })
    }

    /// Removes an activation from any state.
    pub fn remove_activation(
        &self,
        activation_id: ActivationId,
        external_user_id: Option<&str>,
    ) -> ServiceResult<RemoveActivationResponse> {
        let mut guard = self
            .store()
            .find_activation_with_lock(activation_id)
            .ok_or_else(|| {
                info!(%activation_id, "activation does not exist");
                ServiceError::ActivationNotFound
            })?;

        guard.status = ActivationStatus::Removed;
        guard.last_changed_at = Some(Utc::now());
        let snapshot = guard.clone();
        drop(guard);

        self.store().append_activation_history(
            activation_id,
            ActivationStatus::Removed,
            None,
            external_user_id.map(str::to_string),
        );
        self.notify_callbacks(&snapshot);
        info!(%activation_id, "activation removed");
        Ok(RemoveActivationResponse {
            activation_id,
            removed: true,
        })
    }

    /// Returns the encrypted status blob for an activation.
    ///
    /// Absent activations produce a synthetic `REMOVED` answer with random
    /// blob contents so callers cannot probe for existence.
    pub fn get_activation_status(
        &self,
        activation_id: ActivationId,
        challenge: Option<&[u8]>,
    ) -> ServiceResult<GetActivationStatusResponse> {
        let now = Utc::now();

        let Some(record) = self.find_and_expire_activation(activation_id, now) else {
            return Ok(self.synthetic_removed_status(activation_id, challenge));
        };

        if record.status == ActivationStatus::Created {
            // Keys are not exchanged yet; return the activation code with
            // its master-key signature and a random blob.
            let master_key_pair = self
                .store()
                .latest_master_key_pair(record.application_id)
                .ok_or(ServiceError::NoMasterServerKeypair)?;
            let master_private = keys::private_key_from_bytes(&master_key_pair.private_key)
                .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;
            let activation_signature =
                keys::ecdsa_sign(&master_private, record.activation_code.as_bytes());

            return Ok(GetActivationStatusResponse {
                activation_id,
                status: record.status,
                blocked_reason: record.blocked_reason.clone(),
                activation_name: record.activation_name.clone(),
                user_id: record.user_id.clone(),
                extras: record.extras.clone(),
                application_id: Some(record.application_id),
                created_at: Some(record.created_at),
                last_used_at: Some(record.last_used_at),
                last_changed_at: record.last_changed_at,
                encrypted_status_blob: random_bytes(32),
                status_blob_nonce: challenge.map(|_| random_bytes(16)),
                activation_code: Some(record.activation_code.clone()),
                activation_signature: Some(activation_signature),
                device_public_key_fingerprint: None,
                version: record.version.unwrap_or(0),
            });
        }

        // Paired states: build the real blob when a device key exists. An
        // activation removed straight from CREATED has none; fall back to a
        // random blob.
        let mut encrypted_status_blob = random_bytes(32);
        let mut status_blob_nonce = None;
        let mut fingerprint = None;

        if let Some(device_public_key_bytes) = &record.device_public_key {
            let server_private = self.decrypt_server_private_key(&record)?;
            let device_public = keys::public_key_from_bytes(device_public_key_bytes)?;
            let transport_key = keys::derive_transport_key(&server_private, &device_public);

            let ctr_data_hash = match &record.ctr_data {
                Some(ctr_data) => counter::counter_hash(transport_key.as_bytes(), ctr_data),
                // v2 activations have no counter data; the field is zeroed.
                None => [0u8; 16],
            };

            let nonce = challenge.map(|_| random_bytes(16));
            let blob = status_blob::StatusBlob {
                status: record.status,
                current_version: record.version.unwrap_or(0),
                upgrade_version: PROTOCOL_VERSION,
                failed_attempts: record.failed_attempts.min(255) as u8,
                max_failed_attempts: record.max_failed_attempts.min(255) as u8,
                ctr_lookahead: self.config().signature_validation_lookahead.min(255) as u8,
                ctr_info: (record.counter & 0xff) as u8,
                ctr_data_hash,
            };
            encrypted_status_blob = status_blob::encrypt_status_blob(
                &blob,
                transport_key.as_bytes(),
                challenge,
                nonce.as_deref(),
            )?;
            status_blob_nonce = nonce;

            fingerprint = Some(match record.version {
                Some(2) => signature::fingerprint_v2(device_public_key_bytes),
                Some(3) => signature::fingerprint_v3(
                    device_public_key_bytes,
                    &record.server_public_key,
                    &record.activation_id.to_string(),
                ),
                other => {
                    warn!(%activation_id, version = ?other, "unsupported activation version");
                    return Err(ServiceError::ActivationIncorrectState);
                }
            });
        }

        Ok(GetActivationStatusResponse {
            activation_id,
            status: record.status,
            blocked_reason: record.blocked_reason.clone(),
            activation_name: record.activation_name.clone(),
            user_id: record.user_id.clone(),
            extras: record.extras.clone(),
            application_id: Some(record.application_id),
            created_at: Some(record.created_at),
            last_used_at: Some(record.last_used_at),
            last_changed_at: record.last_changed_at,
            encrypted_status_blob,
            status_blob_nonce,
            activation_code: None,
            activation_signature: None,
            device_public_key_fingerprint: fingerprint,
            version: record.version.unwrap_or(0),
        })
    }

    /// Lists activations of a user, lazily expiring pending ones.
    pub fn get_activation_list(
        &self,
        application_id: Option<ApplicationId>,
        user_id: &str,
    ) -> ServiceResult<Vec<ActivationListItem>> {
        let now = Utc::now();
        let records = self.store().find_activations_by_user(application_id, user_id);
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let record = match self.find_and_expire_activation(record.activation_id, now) {
                Some(updated) => updated,
                None => record,
            };
            items.push(self.list_item(record));
        }
        Ok(items)
    }

    /// Multi-criteria activation lookup.
    pub fn lookup_activations(
        &self,
        user_ids: &[String],
        application_ids: Option<&[ApplicationId]>,
        last_used_before: Option<DateTime<Utc>>,
        last_used_after: Option<DateTime<Utc>>,
        status: Option<ActivationStatus>,
    ) -> ServiceResult<Vec<ActivationListItem>> {
        let statuses: Vec<ActivationStatus> = match status {
            Some(status) => vec![status],
            None => vec![
                ActivationStatus::Created,
                ActivationStatus::OtpUsed,
                ActivationStatus::Active,
                ActivationStatus::Blocked,
                ActivationStatus::Removed,
            ],
        };
        let records = self.store().lookup_activations(
            user_ids,
            application_ids,
            last_used_before,
            last_used_after,
            &statuses,
        );
        Ok(records.into_iter().map(|r| self.list_item(r)).collect())
    }

    /// Force-sets the status of a batch of activations.
    pub fn update_activations_status(
        &self,
        activation_ids: &[ActivationId],
        status: ActivationStatus,
    ) -> ServiceResult<bool> {
        for &activation_id in activation_ids {
            let Some(mut guard) = self.store().find_activation_with_lock(activation_id) else {
                continue;
            };
            if guard.status != status {
                guard.status = status;
                guard.last_changed_at = Some(Utc::now());
                let snapshot = guard.clone();
                drop(guard);
                self.store()
                    .append_activation_history(activation_id, status, None, None);
                self.notify_callbacks(&snapshot);
            }
        }
        Ok(true)
    }

    /// History entries of an activation within a time window.
    pub fn get_activation_history(
        &self,
        activation_id: ActivationId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<ActivationHistoryRecord> {
        self.store().list_activation_history(activation_id, from, to)
    }

    // ── shared helpers ───────────────────────────────────────────────

    /// Builds the application-scope layer-2 decryptor for an application
    /// version.
    pub(crate) fn application_scope_decryptor(
        &self,
        master_key_pair: &MasterKeyPair,
        application_secret: &str,
    ) -> ServiceResult<EciesDecryptor> {
        let master_private = keys::private_key_from_bytes(&master_key_pair.private_key)
            .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;
        let shared_info2 = shared_info2_application(application_secret.as_bytes());
        Ok(EciesDecryptor::new(
            master_private,
            SH1_ACTIVATION_LAYER_2,
            shared_info2,
        ))
    }

    /// Decrypts the at-rest protected server private key of an activation.
    pub(crate) fn decrypt_server_private_key(
        &self,
        record: &ActivationRecord,
    ) -> ServiceResult<lockstep_crypto::p256::SecretKey> {
        let context = lockstep_crypto::at_rest::record_context(&[
            &record.user_id,
            &record.activation_id.to_string(),
        ]);
        let key_bytes = self
            .codec()
            .decrypt(&context, &record.server_private_key)
            .map_err(|_| ServiceError::GenericCryptographyError)?;
        keys::private_key_from_bytes(key_bytes.as_bytes()).map_err(ServiceError::from)
    }

    fn encrypt_server_private_key(
        &self,
        server_key_pair: &keys::EcKeyPair,
        user_id: &str,
        activation_id: ActivationId,
    ) -> lockstep_crypto::at_rest::EncryptedValue {
        let context = lockstep_crypto::at_rest::record_context(&[
            user_id,
            &activation_id.to_string(),
        ]);
        self.codec()
            .encrypt(&context, server_key_pair.private_key_bytes().as_bytes())
    }

    /// Expires a locked pending activation whose deadline passed. Returns
    /// true when a transition happened.
    pub(crate) fn expire_pending_locked(&self, guard: &mut ActivationGuard, now: DateTime<Utc>) -> bool {
        if guard.status.is_pending() && now > guard.expires_at {
            guard.status = ActivationStatus::Removed;
            guard.last_changed_at = Some(now);
            let snapshot = guard.clone();
            self.store().append_activation_history(
                snapshot.activation_id,
                ActivationStatus::Removed,
                None,
                None,
            );
            self.notify_callbacks(&snapshot);
            info!(activation_id = %snapshot.activation_id, "pending activation expired");
            return true;
        }
        false
    }

    /// Lock-free read with lazy expiry: upgrades to a lock only when the
    /// snapshot shows an expired pending activation.
    pub(crate) fn find_and_expire_activation(
        &self,
        activation_id: ActivationId,
        now: DateTime<Utc>,
    ) -> Option<ActivationRecord> {
        let record = self.store().find_activation(activation_id)?;
        if record.status.is_pending() && now > record.expires_at {
            let mut guard = self.store().find_activation_with_lock(activation_id)?;
            self.expire_pending_locked(&mut guard, now);
            return Some(guard.clone());
        }
        Some(record)
    }

    /// Validates an activation entering the key-exchange step.
    pub(crate) fn validate_created_activation(
        &self,
        record: &ActivationRecord,
        application_id: ApplicationId,
    ) -> ServiceResult<()> {
        if record.status != ActivationStatus::Created
            || record.application_id != application_id
        {
            info!(activation_id = %record.activation_id, "activation state is invalid");
            return Err(ServiceError::ActivationExpired);
        }
        if !validate_code(&record.activation_code) {
            info!(activation_id = %record.activation_id, "activation code is invalid");
            return Err(ServiceError::ActivationExpired);
        }
        Ok(())
    }

    /// Applies the layer-2 request to a `CREATED` activation, transitioning
    /// it to `OTP_USED` and issuing recovery material when enabled.
    pub(crate) fn complete_key_exchange(
        &self,
        guard: &mut ActivationGuard,
        request: &ActivationLayer2Request,
        now: DateTime<Utc>,
    ) -> ServiceResult<Option<ActivationRecovery>> {
        let device_key_bytes = BASE64
            .decode(&request.device_public_key)
            .ok()
            .and_then(|bytes| keys::public_key_from_bytes(&bytes).ok());
        let Some(device_public) = device_key_bytes else {
            // Pairing can no longer complete; sink the activation.
            return Err(self.remove_for_invalid_public_key(guard, now));
        };

        let ctr_data = counter::init_counter();
        guard.status = ActivationStatus::OtpUsed;
        // Stored in normalized (compressed) form regardless of how the
        // device encoded it.
        guard.device_public_key = Some(keys::public_key_to_bytes(&device_public));
        guard.activation_name = request.activation_name.clone();
        guard.extras = request.extras.clone();
        guard.version = Some(PROTOCOL_VERSION);
        guard.ctr_data = Some(ctr_data);
        guard.last_changed_at = Some(now);

        let snapshot = guard.clone();
        self.store().append_activation_history(
            snapshot.activation_id,
            ActivationStatus::OtpUsed,
            None,
            None,
        );
        self.notify_callbacks(&snapshot);

        let recovery_enabled = self
            .store()
            .find_recovery_config(snapshot.application_id)
            .is_some_and(|c| c.activation_recovery_enabled);
        if recovery_enabled {
            let recovery = self.create_recovery_code_for_activation(&snapshot)?;
            return Ok(Some(recovery));
        }
        Ok(None)
    }

    fn remove_for_invalid_public_key(
        &self,
        guard: &mut ActivationGuard,
        now: DateTime<Utc>,
    ) -> ServiceError {
        guard.status = ActivationStatus::Removed;
        guard.last_changed_at = Some(now);
        let snapshot = guard.clone();
        self.store().append_activation_history(
            snapshot.activation_id,
            ActivationStatus::Removed,
            None,
            None,
        );
        self.notify_callbacks(&snapshot);
        warn!(activation_id = %snapshot.activation_id, "invalid device public key");
        ServiceError::ActivationNotFound
    }

    pub(crate) fn layer2_response(
        &self,
        record: &ActivationRecord,
        recovery: Option<ActivationRecovery>,
    ) -> ServiceResult<ActivationLayer2Response> {
        let ctr_data = record
            .ctr_data
            .ok_or(ServiceError::ActivationIncorrectState)?;
        Ok(ActivationLayer2Response {
            activation_id: record.activation_id.to_string(),
            ctr_data: BASE64.encode(ctr_data),
            server_public_key: BASE64.encode(&record.server_public_key),
            activation_recovery: recovery,
        })
    }

    fn activate_recovery_codes(&self, activation: &ActivationRecord, now: DateTime<Utc>) {
        use lockstep_types::RecoveryCodeStatus;
        let codes = self
            .store()
            .find_recovery_codes_by_activation(activation.application_id, activation.activation_id);
        for code in codes {
            if code.status == RecoveryCodeStatus::Created {
                if let Some(mut guard) = self.store().find_recovery_code_with_lock(code.id) {
                    if guard.status == RecoveryCodeStatus::Created {
                        guard.status = RecoveryCodeStatus::Active;
                        guard.last_changed_at = Some(now);
                    }
                }
            }
        }
    }

    fn synthetic_removed_status(
        &self,
        activation_id: ActivationId,
        challenge: Option<&[u8]>,
    ) -> GetActivationStatusResponse {
        GetActivationStatusResponse {
            activation_id,
            status: ActivationStatus::Removed,
            blocked_reason: None,
            activation_name: None,
            user_id: "unknown".to_string(),
            extras: None,
            application_id: None,
            created_at: None,
            last_used_at: None,
            last_changed_at: None,
            encrypted_status_blob: random_bytes(32),
            status_blob_nonce: challenge.map(|_| random_bytes(16)),
            activation_code: None,
            activation_signature: None,
            device_public_key_fingerprint: None,
            version: 0,
        }
    }

    fn list_item(&self, record: ActivationRecord) -> ActivationListItem {
        let application_name = self
            .store()
            .find_application(record.application_id)
            .map(|a| a.name)
            .unwrap_or_default();
        ActivationListItem {
            activation_id: record.activation_id,
            status: record.status,
            blocked_reason: record.blocked_reason,
            activation_name: record.activation_name,
            extras: record.extras,
            user_id: record.user_id,
            application_id: record.application_id,
            application_name,
            created_at: record.created_at,
            last_used_at: record.last_used_at,
            last_changed_at: record.last_changed_at,
            version: record.version.unwrap_or(0),
        }
    }
}

pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
