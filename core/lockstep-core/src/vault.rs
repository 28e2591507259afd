//! Vault unlock: hands the device its vault encryption key after a
//! successful signature verification.
//!
//! The vault key is derived from the activation's ECDH secret and returned
//! wrapped under the transport key, inside a vault-scope ECIES envelope.
//! A failed signature still yields a well-formed response with
//! `signature_valid = false` and no payload.

use crate::{Service, ServiceError, ServiceResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lockstep_crypto::ecies::{
    shared_info2_activation, EciesCryptogram, EciesDecryptor, SH1_VAULT_UNLOCK,
};
use lockstep_crypto::keys;
use lockstep_types::{ActivationId, SignatureType};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Inner payload of the vault unlock response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnlockPayload {
    /// Base64 of the vault encryption key, wrapped under the transport key.
    pub encrypted_vault_encryption_key: String,
}

/// Result of `vault_unlock`.
#[derive(Debug)]
pub struct VaultUnlockResponse {
    pub signature_valid: bool,
    /// Present only when the signature was valid.
    pub cryptogram: Option<EciesCryptogram>,
}

impl Service {
    /// Unlocks the vault for an active activation.
    ///
    /// `data` and `signature` authenticate the request with an online
    /// signature; `cryptogram` carries the encrypted unlock reason and
    /// determines the response envelope.
    pub fn vault_unlock(
        &self,
        activation_id: ActivationId,
        application_key: &str,
        data: &[u8],
        signature: &str,
        signature_type: SignatureType,
        cryptogram: &EciesCryptogram,
    ) -> ServiceResult<VaultUnlockResponse> {
        let verification =
            self.verify_signature(activation_id, application_key, data, signature, signature_type)?;
        if !verification.signature_valid {
            info!(%activation_id, "vault unlock rejected: invalid signature");
            return Ok(VaultUnlockResponse {
                signature_valid: false,
                cryptogram: None,
            });
        }

        let activation = self
            .store()
            .find_activation(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;

        let server_private = self.decrypt_server_private_key(&activation)?;
        let device_public_bytes = activation
            .device_public_key
            .as_deref()
            .ok_or(ServiceError::ActivationIncorrectState)?;
        let device_public = keys::public_key_from_bytes(device_public_bytes)?;
        let transport_key = keys::derive_transport_key(&server_private, &device_public);
        let vault_key = keys::derive_vault_key(&server_private, &device_public);

        let shared_info2 = shared_info2_activation(
            version.application_secret.as_bytes(),
            Some(transport_key.as_bytes()),
        );
        let mut decryptor = EciesDecryptor::new(server_private, SH1_VAULT_UNLOCK, shared_info2);

        // The request carries an unlock reason; its content is logged by the
        // RPC layer and has no effect here beyond authenticating the
        // envelope.
        let _reason = decryptor.decrypt_request(cryptogram)?;

        let wrapped = keys::wrap_key(vault_key.as_bytes(), transport_key.as_bytes())?;
        let payload = VaultUnlockPayload {
            encrypted_vault_encryption_key: BASE64.encode(wrapped),
        };
        let response_bytes =
            serde_json::to_vec(&payload).map_err(|e| ServiceError::Unknown(e.to_string()))?;
        let response = decryptor.encrypt_response(&response_bytes)?;

        info!(%activation_id, "vault unlocked");
        Ok(VaultUnlockResponse {
            signature_valid: true,
            cryptogram: Some(response),
        })
    }
}
