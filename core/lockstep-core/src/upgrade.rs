//! Protocol v2 → v3 upgrade.
//!
//! Legacy activations carry only the numeric counter. `start_upgrade`
//! initializes the hash-based counter and hands it to the device through an
//! activation-scope envelope; `commit_upgrade` flips the version once the
//! device confirmed. The numeric counter is preserved throughout.

use crate::{Service, ServiceError, ServiceResult, PROTOCOL_VERSION};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use lockstep_crypto::ecies::{
    shared_info2_activation, EciesCryptogram, EciesDecryptor, SH1_UPGRADE,
};
use lockstep_crypto::{counter, keys};
use lockstep_types::{ActivationId, ActivationStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Inner payload of the upgrade-start response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePayload {
    /// Base64 of the freshly initialized hash-based counter state.
    pub ctr_data: String,
}

/// Result of `commit_upgrade`.
#[derive(Debug, Clone)]
pub struct CommitUpgradeResponse {
    pub committed: bool,
}

impl Service {
    /// Starts the upgrade handshake for a v2 activation.
    ///
    /// Retries are safe: an already-initialized counter is returned as-is
    /// rather than regenerated.
    pub fn start_upgrade(
        &self,
        activation_id: ActivationId,
        application_key: &str,
        cryptogram: &EciesCryptogram,
    ) -> ServiceResult<EciesCryptogram> {
        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;

        let mut guard = self
            .store()
            .find_activation_with_lock(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        if guard.application_id != version.application_id {
            return Err(ServiceError::InvalidApplication);
        }
        if guard.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }
        if guard.version != Some(2) {
            return Err(ServiceError::ActivationIncorrectState);
        }

        let ctr_data = match guard.ctr_data {
            Some(existing) => existing,
            None => {
                let fresh = counter::init_counter();
                guard.ctr_data = Some(fresh);
                guard.last_changed_at = Some(Utc::now());
                fresh
            }
        };

        let server_private = self.decrypt_server_private_key(&guard)?;
        let device_public_bytes = guard
            .device_public_key
            .clone()
            .ok_or(ServiceError::ActivationIncorrectState)?;
        drop(guard);

        let device_public = keys::public_key_from_bytes(&device_public_bytes)?;
        let transport_key = keys::derive_transport_key(&server_private, &device_public);
        let shared_info2 = shared_info2_activation(
            version.application_secret.as_bytes(),
            Some(transport_key.as_bytes()),
        );
        let mut decryptor = EciesDecryptor::new(server_private, SH1_UPGRADE, shared_info2);
        decryptor.decrypt_request(cryptogram)?;

        let payload = UpgradePayload {
            ctr_data: BASE64.encode(ctr_data),
        };
        let response_bytes =
            serde_json::to_vec(&payload).map_err(|e| ServiceError::Unknown(e.to_string()))?;

        info!(%activation_id, "upgrade started");
        decryptor.encrypt_response(&response_bytes).map_err(ServiceError::from)
    }

    /// Commits the upgrade, switching the activation to protocol v3.
    pub fn commit_upgrade(
        &self,
        activation_id: ActivationId,
        application_key: &str,
    ) -> ServiceResult<CommitUpgradeResponse> {
        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;

        let mut guard = self
            .store()
            .find_activation_with_lock(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        if guard.application_id != version.application_id {
            return Err(ServiceError::InvalidApplication);
        }
        if guard.status != ActivationStatus::Active || guard.version != Some(2) {
            return Err(ServiceError::ActivationIncorrectState);
        }
        if guard.ctr_data.is_none() {
            // Commit before start.
            return Err(ServiceError::ActivationIncorrectState);
        }

        guard.version = Some(PROTOCOL_VERSION);
        guard.last_changed_at = Some(Utc::now());
        let snapshot = guard.clone();
        drop(guard);

        self.store().append_activation_history(
            activation_id,
            snapshot.status,
            Some("protocol_upgrade".to_string()),
            None,
        );

        info!(%activation_id, "upgrade committed");
        Ok(CommitUpgradeResponse { committed: true })
    }
}
