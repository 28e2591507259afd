//! Token issuance and digest validation.
//!
//! Tokens provide lightweight authentication after activation: the server
//! vends an `(id, secret)` pair through an ECIES envelope, and later
//! validates digests computed as `HMAC-SHA256(secret, nonce || timestamp)`.

use crate::{Service, ServiceError, ServiceResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use lockstep_crypto::ecies::{
    shared_info2_activation, EciesCryptogram, EciesDecryptor, SH1_CREATE_TOKEN,
};
use lockstep_crypto::{kdf, keys};
use lockstep_store::TokenRecord;
use lockstep_types::{ActivationId, ActivationStatus, ApplicationId, SignatureType, TokenId};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Length of a token secret.
const TOKEN_SECRET_LENGTH: usize = 16;

/// Inner payload of the token-creation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub token_id: String,
    /// Base64 of the token secret.
    pub token_secret: String,
}

/// Result of `validate_token`.
#[derive(Debug, Clone, Default)]
pub struct ValidateTokenResponse {
    pub token_valid: bool,
    pub activation_id: Option<ActivationId>,
    pub application_id: Option<ApplicationId>,
    pub user_id: Option<String>,
    pub signature_type: Option<SignatureType>,
}

impl Service {
    /// Creates a token for an active activation. The request and response
    /// both travel through an activation-scope ECIES envelope.
    pub fn create_token(
        &self,
        activation_id: ActivationId,
        application_key: &str,
        signature_type: SignatureType,
        cryptogram: &EciesCryptogram,
    ) -> ServiceResult<EciesCryptogram> {
        let activation = self
            .store()
            .find_activation(activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }

        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or(ServiceError::InvalidApplication)?;
        if version.application_id != activation.application_id {
            return Err(ServiceError::InvalidApplication);
        }

        let server_private = self.decrypt_server_private_key(&activation)?;
        let device_public_bytes = activation
            .device_public_key
            .as_deref()
            .ok_or(ServiceError::ActivationIncorrectState)?;
        let device_public = keys::public_key_from_bytes(device_public_bytes)?;
        let transport_key = keys::derive_transport_key(&server_private, &device_public);

        let shared_info2 = shared_info2_activation(
            version.application_secret.as_bytes(),
            Some(transport_key.as_bytes()),
        );
        let mut decryptor = EciesDecryptor::new(server_private, SH1_CREATE_TOKEN, shared_info2);

        // The canonical request payload is "{}"; an empty plaintext means
        // the envelope was not built correctly.
        let request = decryptor.decrypt_request(cryptogram)?;
        if request.is_empty() {
            return Err(ServiceError::DecryptionFailed);
        }

        let mut token_id = None;
        for _ in 0..self.config().token_id_iterations {
            let candidate = TokenId::generate();
            if !self.store().token_exists(&candidate) {
                token_id = Some(candidate);
                break;
            }
        }
        let token_id = token_id.ok_or(ServiceError::UnableToGenerateToken)?;
        let token_secret = crate::activation::random_bytes(TOKEN_SECRET_LENGTH);

        self.store().insert_token(TokenRecord {
            token_id: token_id.clone(),
            token_secret: token_secret.clone(),
            activation_id,
            signature_type_created: signature_type,
            created_at: Utc::now(),
        })?;

        let token_info = TokenInfo {
            token_id: token_id.to_string(),
            token_secret: BASE64.encode(&token_secret),
        };
        let response_bytes =
            serde_json::to_vec(&token_info).map_err(|e| ServiceError::Unknown(e.to_string()))?;

        info!(%activation_id, token_id = %token_id, "token created");
        decryptor.encrypt_response(&response_bytes).map_err(ServiceError::from)
    }

    /// Validates a token digest over `(nonce, timestamp)`.
    ///
    /// An unknown token is not an error: it yields `token_valid = false`.
    pub fn validate_token(
        &self,
        token_id: &TokenId,
        nonce: &[u8],
        timestamp_millis: i64,
        digest: &[u8],
    ) -> ServiceResult<ValidateTokenResponse> {
        let Some(token) = self.store().find_token(token_id) else {
            return Ok(ValidateTokenResponse::default());
        };

        let activation = self
            .store()
            .find_activation(token.activation_id)
            .ok_or(ServiceError::ActivationNotFound)?;
        if activation.status != ActivationStatus::Active {
            return Err(ServiceError::ActivationIncorrectState);
        }

        let expected = compute_token_digest(&token.token_secret, nonce, timestamp_millis);
        if !kdf::constant_time_eq(&expected, digest) {
            return Ok(ValidateTokenResponse::default());
        }

        Ok(ValidateTokenResponse {
            token_valid: true,
            activation_id: Some(activation.activation_id),
            application_id: Some(activation.application_id),
            user_id: Some(activation.user_id),
            signature_type: Some(token.signature_type_created),
        })
    }

    /// Removes a token when it belongs to the given activation. Idempotent.
    pub fn remove_token(&self, token_id: &TokenId, activation_id: ActivationId) -> bool {
        match self.store().find_token(token_id) {
            Some(token) if token.activation_id == activation_id => {
                self.store().delete_token(token_id)
            }
            _ => false,
        }
    }
}

/// The token digest: `HMAC-SHA256(secret, nonce || ascii(timestamp_millis))`.
#[must_use]
pub fn compute_token_digest(secret: &[u8], nonce: &[u8], timestamp_millis: i64) -> [u8; 32] {
    let mut data = nonce.to_vec();
    data.extend_from_slice(timestamp_millis.to_string().as_bytes());
    kdf::hmac_sha256(secret, &data)
}
