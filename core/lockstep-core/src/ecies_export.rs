//! ECIES decryptor parameters for a mediating server.
//!
//! A trust-separation intermediary can decrypt generic-scope envelopes
//! without ever holding a static private key: this export derives the
//! envelope key from the ephemeral public key and hands it out together
//! with `sharedInfo2`. Without the static key the intermediary cannot
//! derive material for any other session.

use crate::{Service, ServiceError, ServiceResult};
use lockstep_crypto::ecies::{
    shared_info2_activation, shared_info2_application, EciesDecryptor, SH1_ACTIVATION_GENERIC,
    SH1_APPLICATION_GENERIC,
};
use lockstep_crypto::keys;
use lockstep_types::{ActivationId, ActivationStatus};
use tracing::{info, warn};

/// Exported decryptor parameters.
#[derive(Debug)]
pub struct EciesDecryptorParameters {
    /// The derived envelope key (48 bytes).
    pub secret_key: Vec<u8>,
    /// The `sharedInfo2` of the scope.
    pub shared_info2: [u8; 32],
}

impl Service {
    /// Returns envelope-key material for an intermediate server.
    ///
    /// Without `activation_id` the export is application-scoped (master
    /// key, generic application `sharedInfo1`); with it, activation-scoped
    /// (server key, transport key, generic activation `sharedInfo1`).
    pub fn get_ecies_decryptor_parameters(
        &self,
        application_key: &str,
        activation_id: Option<ActivationId>,
        ephemeral_public_key: &[u8],
    ) -> ServiceResult<EciesDecryptorParameters> {
        if application_key.is_empty() || ephemeral_public_key.is_empty() {
            warn!("invalid request for ECIES decryptor");
            return Err(ServiceError::DecryptionFailed);
        }
        match activation_id {
            None => self.decryptor_parameters_for_application(application_key, ephemeral_public_key),
            Some(id) => {
                self.decryptor_parameters_for_activation(application_key, id, ephemeral_public_key)
            }
        }
    }

    fn decryptor_parameters_for_application(
        &self,
        application_key: &str,
        ephemeral_public_key: &[u8],
    ) -> ServiceResult<EciesDecryptorParameters> {
        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or_else(|| {
                warn!(application_key, "application version is incorrect");
                ServiceError::InvalidApplication
            })?;
        let master_key_pair = self
            .store()
            .latest_master_key_pair(version.application_id)
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        let master_private = keys::private_key_from_bytes(&master_key_pair.private_key)
            .map_err(|_| ServiceError::IncorrectMasterServerKeypairPrivate)?;

        let shared_info2 = shared_info2_application(version.application_secret.as_bytes());
        let mut decryptor =
            EciesDecryptor::new(master_private, SH1_APPLICATION_GENERIC, shared_info2);
        decryptor.init_envelope_key(ephemeral_public_key)?;

        let envelope = decryptor
            .envelope_key()
            .ok_or(ServiceError::DecryptionFailed)?;
        info!("exported application-scope decryptor parameters");
        Ok(EciesDecryptorParameters {
            secret_key: envelope.secret_bytes().as_bytes().to_vec(),
            shared_info2,
        })
    }

    fn decryptor_parameters_for_activation(
        &self,
        application_key: &str,
        activation_id: ActivationId,
        ephemeral_public_key: &[u8],
    ) -> ServiceResult<EciesDecryptorParameters> {
        let activation = self
            .store()
            .find_activation(activation_id)
            .ok_or_else(|| {
                info!(%activation_id, "activation does not exist");
                ServiceError::ActivationNotFound
            })?;
        if activation.status != ActivationStatus::Active {
            info!(%activation_id, "activation is not active");
            return Err(ServiceError::ActivationIncorrectState);
        }

        let version = self
            .store()
            .find_version_by_application_key(application_key)
            .filter(|v| v.supported)
            .ok_or_else(|| {
                warn!(application_key, "application version is incorrect");
                ServiceError::InvalidApplication
            })?;
        if version.application_id != activation.application_id {
            warn!(application_key, "application does not match activation");
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
        let mut decryptor =
            EciesDecryptor::new(server_private, SH1_ACTIVATION_GENERIC, shared_info2);
        decryptor.init_envelope_key(ephemeral_public_key)?;

        let envelope = decryptor
            .envelope_key()
            .ok_or(ServiceError::DecryptionFailed)?;
        info!(%activation_id, "exported activation-scope decryptor parameters");
        Ok(EciesDecryptorParameters {
            secret_key: envelope.secret_bytes().as_bytes().to_vec(),
            shared_info2,
        })
    }
}
