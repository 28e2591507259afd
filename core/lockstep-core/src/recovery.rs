//! Recovery codes and PUK-driven re-activation.
//!
//! A recovery code shares the activation-code format and carries PUKs
//! verified strictly in index order. A successful PUK use removes the bound
//! activation, creates a fresh one for the same user and rotates the
//! recovery material; failed attempts are throttled per code.

use crate::activation::{ActivationLayer2Request, CreateActivationResponse};
use crate::{Service, ServiceError, ServiceResult};
use chrono::Utc;
use lockstep_crypto::at_rest::record_context;
use lockstep_crypto::ecies::EciesCryptogram;
use lockstep_crypto::password;
use lockstep_store::{ActivationRecord, RecoveryCodeRecord, RecoveryConfig, RecoveryPukRecord};
use lockstep_types::{
    generate_code, ApplicationId, RecoveryCodeStatus, RecoveryPukStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Number of digits in a generated PUK.
const PUK_DIGITS: usize = 4;

/// Recovery material returned to the device inside the layer-2 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecovery {
    pub recovery_code: String,
    pub puk: String,
}

impl Service {
    /// Whether activation recovery is enabled for an application.
    pub fn get_recovery_config(&self, application_id: ApplicationId) -> bool {
        self.store()
            .find_recovery_config(application_id)
            .map(|c| c.activation_recovery_enabled)
            .unwrap_or(false)
    }

    /// Enables or disables activation recovery for an application.
    pub fn update_recovery_config(&self, application_id: ApplicationId, enabled: bool) {
        self.store().set_recovery_config(RecoveryConfig {
            application_id,
            activation_recovery_enabled: enabled,
        });
    }

    /// Issues one recovery code with one PUK for a freshly paired
    /// activation. The code starts in `CREATED` and turns `ACTIVE` when the
    /// activation is committed.
    pub(crate) fn create_recovery_code_for_activation(
        &self,
        activation: &ActivationRecord,
    ) -> ServiceResult<ActivationRecovery> {
        use lockstep_types::ActivationStatus;

        let enabled = self
            .store()
            .find_recovery_config(activation.application_id)
            .is_some_and(|c| c.activation_recovery_enabled);
        if !enabled {
            warn!("activation recovery is disabled");
            return Err(ServiceError::InvalidRequest);
        }
        if activation.status != ActivationStatus::OtpUsed
            && activation.status != ActivationStatus::Active
        {
            warn!(
                activation_id = %activation.activation_id,
                status = ?activation.status,
                "recovery code creation in invalid activation state"
            );
            return Err(ServiceError::ActivationIncorrectState);
        }

        // One live recovery code per activation.
        let existing = self
            .store()
            .find_recovery_codes_by_activation(activation.application_id, activation.activation_id);
        if existing.iter().any(|c| {
            c.status == RecoveryCodeStatus::Created || c.status == RecoveryCodeStatus::Active
        }) {
            warn!(
                activation_id = %activation.activation_id,
                "recovery code already exists"
            );
            return Err(ServiceError::RecoveryCodeAlreadyExists);
        }

        // Rejection sampling for a unique code within the application.
        let mut recovery_code = None;
        for _ in 0..self.config().recovery_code_iterations {
            let candidate = generate_code();
            if !self
                .store()
                .recovery_code_in_use(activation.application_id, &candidate)
            {
                recovery_code = Some(candidate);
                break;
            }
        }
        let recovery_code = recovery_code.ok_or(ServiceError::UnableToGenerateRecoveryCode)?;

        let puk = password::generate_puk(PUK_DIGITS);
        let puk_hash = password::hash_puk(puk.as_bytes())
            .map_err(|_| ServiceError::GenericCryptographyError)?;
        let context = record_context(&[
            &activation.application_id.to_string(),
            &activation.user_id,
            &recovery_code,
            "1",
        ]);
        let protected_hash = self.codec().encrypt(&context, puk_hash.as_bytes());

        self.store().insert_recovery_code(RecoveryCodeRecord {
            id: 0,
            application_id: activation.application_id,
            user_id: activation.user_id.clone(),
            activation_id: Some(activation.activation_id),
            recovery_code: recovery_code.clone(),
            status: RecoveryCodeStatus::Created,
            failed_attempts: 0,
            max_failed_attempts: self.config().recovery_max_failed_attempts,
            created_at: Utc::now(),
            last_changed_at: None,
            puks: vec![RecoveryPukRecord {
                puk_index: 1,
                puk_hash: protected_hash,
                status: RecoveryPukStatus::Valid,
                last_changed_at: None,
            }],
        });

        info!(activation_id = %activation.activation_id, "recovery code issued");
        Ok(ActivationRecovery { recovery_code, puk })
    }

    /// Creates a new activation by consuming a recovery PUK.
    ///
    /// On success the activation previously bound to the recovery code is
    /// removed, the consumed PUK turns `USED`, the exhausted code turns
    /// `REVOKED`, and fresh recovery material accompanies the new
    /// activation in the encrypted response.
    pub fn create_activation_via_recovery(
        &self,
        recovery_code: &str,
        puk: &str,
        application_key: &str,
        max_failure_count: Option<u64>,
        cryptogram: &EciesCryptogram,
    ) -> ServiceResult<CreateActivationResponse> {
        let now = Utc::now();

        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or_else(|| {
                warn!(application_key, "unsupported application version");
                ServiceError::InvalidRequest
            })?;
        let application_id = version.application_id;

        let enabled = self
            .store()
            .find_recovery_config(application_id)
            .is_some_and(|c| c.activation_recovery_enabled);
        if !enabled {
            warn!("activation recovery is disabled");
            return Err(ServiceError::InvalidRequest);
        }

        let master_key_pair = self
            .store()
            .latest_master_key_pair(application_id)
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        let mut decryptor =
            self.application_scope_decryptor(&master_key_pair, &version.application_secret)?;
        let request_bytes = decryptor.decrypt_request(cryptogram)?;
        let request: ActivationLayer2Request = serde_json::from_slice(&request_bytes)
            .map_err(|_| ServiceError::InvalidInputFormat)?;

        // Verify the PUK under the recovery code row lock.
        let (user_id, bound_activation_id) =
            self.verify_and_consume_puk(application_id, recovery_code, puk)?;

        // Replace the bound activation, if one exists.
        if let Some(activation_id) = bound_activation_id {
            self.remove_activation(activation_id, None)?;
            self.revoke_if_exhausted(application_id, recovery_code, now);
        }

        // New activation for the same user; committed by the master
        // back-end like any other pending activation.
        let init = self.init_activation(application_id, &user_id, max_failure_count, None)?;
        let mut guard = self
            .store()
            .find_activation_with_lock(init.activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        self.validate_created_activation(&guard, application_id)?;

        let recovery = self.complete_key_exchange(&mut guard, &request, now)?;
        let response = self.layer2_response(&guard, recovery)?;
        let activation_id = guard.activation_id;
        let user_id = guard.user_id.clone();
        drop(guard);

        let response_bytes =
            serde_json::to_vec(&response).map_err(|e| ServiceError::Unknown(e.to_string()))?;
        let cryptogram = decryptor.encrypt_response(&response_bytes)?;

        info!(%activation_id, "activation created via recovery");
        Ok(CreateActivationResponse {
            activation_id,
            user_id,
            cryptogram,
        })
    }

    /// Verifies the candidate PUK against the lowest-index `VALID` PUK and
    /// applies the success/failure bookkeeping. Returns the code's user and
    /// the bound activation on success.
    fn verify_and_consume_puk(
        &self,
        application_id: ApplicationId,
        recovery_code: &str,
        puk: &str,
    ) -> ServiceResult<(String, Option<lockstep_types::ActivationId>)> {
        let now = Utc::now();

        let snapshot = self
            .store()
            .find_recovery_code(application_id, recovery_code)
            .ok_or_else(|| {
                warn!("recovery code does not exist");
                ServiceError::InvalidRequest
            })?;
        if snapshot.status != RecoveryCodeStatus::Active {
            warn!(status = ?snapshot.status, "recovery code is not active");
            return Err(ServiceError::InvalidRequest);
        }

        let mut guard = self
            .store()
            .find_recovery_code_with_lock(snapshot.id)
            .ok_or(ServiceError::InvalidRequest)?;
        if guard.status != RecoveryCodeStatus::Active {
            return Err(ServiceError::InvalidRequest);
        }

        let context_parts = (
            guard.application_id.to_string(),
            guard.user_id.clone(),
            guard.recovery_code.clone(),
        );

        let puk_valid = match guard.first_valid_puk() {
            Some(valid_puk) => {
                let context = record_context(&[
                    &context_parts.0,
                    &context_parts.1,
                    &context_parts.2,
                    &valid_puk.puk_index.to_string(),
                ]);
                let hash_bytes = self
                    .codec()
                    .decrypt(&context, &valid_puk.puk_hash)
                    .map_err(|_| ServiceError::GenericCryptographyError)?;
                let hash = String::from_utf8(hash_bytes.as_bytes().to_vec())
                    .map_err(|_| ServiceError::GenericCryptographyError)?;
                password::verify_puk(puk.as_bytes(), &hash)
                    .map_err(|_| ServiceError::GenericCryptographyError)?
            }
            None => false,
        };

        if !puk_valid {
            info!("invalid recovery PUK");
            guard.failed_attempts += 1;
            guard.last_changed_at = Some(now);
            let mut blocked_puk_index = None;
            if guard.failed_attempts >= guard.max_failed_attempts {
                let valid_index = guard.first_valid_puk().map(|p| p.puk_index);
                if let Some(index) = valid_index {
                    if let Some(valid_puk) =
                        guard.puks.iter_mut().find(|p| p.puk_index == index)
                    {
                        valid_puk.status = RecoveryPukStatus::Invalid;
                        valid_puk.last_changed_at = Some(now);
                    }
                    guard.status = RecoveryCodeStatus::Blocked;
                    blocked_puk_index = Some(index);
                }
            }
            // Report the PUK the caller should retry with, unless the code
            // was just blocked and the PUK invalidated.
            let current_puk_index = if blocked_puk_index.is_some() {
                None
            } else {
                guard.first_valid_puk().map(|p| p.puk_index)
            };
            return Err(ServiceError::InvalidRecoveryCode { current_puk_index });
        }

        guard.failed_attempts = 0;
        guard.last_changed_at = Some(now);
        if let Some(valid_puk) = guard.first_valid_puk_mut() {
            valid_puk.status = RecoveryPukStatus::Used;
            valid_puk.last_changed_at = Some(now);
        }

        Ok((guard.user_id.clone(), guard.activation_id))
    }

    /// Revokes a recovery code once no `VALID` PUK remains.
    fn revoke_if_exhausted(
        &self,
        application_id: ApplicationId,
        recovery_code: &str,
        now: chrono::DateTime<Utc>,
    ) {
        let Some(snapshot) = self.store().find_recovery_code(application_id, recovery_code)
        else {
            return;
        };
        let Some(mut guard) = self.store().find_recovery_code_with_lock(snapshot.id) else {
            return;
        };
        if guard.first_valid_puk().is_none() && guard.status == RecoveryCodeStatus::Active {
            guard.status = RecoveryCodeStatus::Revoked;
            guard.last_changed_at = Some(now);
        }
    }
}
