//! Application, version, integration and callback URL management.

use crate::activation::random_bytes;
use crate::{Service, ServiceError, ServiceResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lockstep_store::{
    Application, ApplicationVersion, CallbackUrlRecord, IntegrationRecord, MasterKeyPair,
};
use lockstep_crypto::keys::EcKeyPair;
use lockstep_types::ApplicationId;
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Full application detail: versions and the current master public key.
#[derive(Debug, Clone)]
pub struct ApplicationDetail {
    pub application: Application,
    pub versions: Vec<ApplicationVersion>,
    pub master_public_key: Vec<u8>,
}

impl Service {
    /// Creates an application together with its first version ("default")
    /// and its master key pair.
    pub fn create_application(&self, name: &str) -> ServiceResult<ApplicationDetail> {
        let application = self.store().create_application(name);

        let master = EcKeyPair::generate();
        let master_key_pair: MasterKeyPair = self.store().create_master_key_pair(
            application.id,
            master.private_key_bytes().as_bytes().to_vec(),
            master.public_key_bytes(),
        )?;

        let version = self.create_application_version(application.id, "default")?;

        info!(application_id = %application.id, name, "application created");
        Ok(ApplicationDetail {
            application,
            versions: vec![version],
            master_public_key: master_key_pair.public_key,
        })
    }

    /// All applications.
    pub fn get_application_list(&self) -> Vec<Application> {
        self.store().list_applications()
    }

    /// Detail of one application.
    pub fn get_application_detail(&self, id: ApplicationId) -> ServiceResult<ApplicationDetail> {
        let application = self
            .store()
            .find_application(id)
            .ok_or(ServiceError::InvalidRequest)?;
        let versions = self.store().list_application_versions(id);
        let master_public_key = self
            .store()
            .latest_master_key_pair(id)
            .map(|p| p.public_key)
            .ok_or(ServiceError::NoMasterServerKeypair)?;
        Ok(ApplicationDetail {
            application,
            versions,
            master_public_key,
        })
    }

    /// Creates an application version with fresh random credentials.
    pub fn create_application_version(
        &self,
        application_id: ApplicationId,
        name: &str,
    ) -> ServiceResult<ApplicationVersion> {
        let application_key = BASE64.encode(random_bytes(16));
        let application_secret = BASE64.encode(random_bytes(16));
        self.store()
            .create_application_version(application_id, name, &application_key, &application_secret)
            .map_err(ServiceError::from)
    }

    /// Marks a version as supported.
    pub fn support_application_version(&self, version_id: u64) -> ServiceResult<ApplicationVersion> {
        self.store()
            .set_version_supported(version_id, true)
            .map_err(ServiceError::from)
    }

    /// Marks a version as unsupported; its application key stops working.
    pub fn unsupport_application_version(
        &self,
        version_id: u64,
    ) -> ServiceResult<ApplicationVersion> {
        self.store()
            .set_version_supported(version_id, false)
            .map_err(ServiceError::from)
    }

    // ── integrations ─────────────────────────────────────────────────

    /// Registers a master back-end integration with random credentials.
    pub fn create_integration(&self, name: &str) -> IntegrationRecord {
        let record = IntegrationRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            client_token: BASE64.encode(random_bytes(16)),
            client_secret: BASE64.encode(random_bytes(16)),
        };
        self.store().insert_integration(record.clone());
        info!(name, "integration created");
        record
    }

    /// All integrations.
    pub fn get_integration_list(&self) -> Vec<IntegrationRecord> {
        self.store().list_integrations()
    }

    /// Removes an integration.
    pub fn remove_integration(&self, id: Uuid) -> bool {
        self.store().delete_integration(id)
    }

    // ── callback URLs ────────────────────────────────────────────────

    /// Registers a callback URL after validating its format.
    pub fn create_callback_url(
        &self,
        application_id: ApplicationId,
        name: &str,
        url: &str,
        attributes: BTreeSet<String>,
    ) -> ServiceResult<CallbackUrlRecord> {
        validate_callback_url(url)?;
        let record = CallbackUrlRecord {
            id: Uuid::new_v4(),
            application_id,
            name: name.to_string(),
            url: url.to_string(),
            attributes,
        };
        self.store().insert_callback_url(record.clone());
        info!(application_id = %application_id, url, "callback URL created");
        Ok(record)
    }

    /// Updates an existing callback URL.
    pub fn update_callback_url(
        &self,
        id: Uuid,
        name: &str,
        url: &str,
        attributes: BTreeSet<String>,
    ) -> ServiceResult<CallbackUrlRecord> {
        validate_callback_url(url)?;
        let existing = self
            .store()
            .find_callback_url(id)
            .ok_or(ServiceError::InvalidRequest)?;
        let record = CallbackUrlRecord {
            id,
            application_id: existing.application_id,
            name: name.to_string(),
            url: url.to_string(),
            attributes,
        };
        self.store().update_callback_url(record.clone())?;
        Ok(record)
    }

    /// Callback URLs of one application.
    pub fn get_callback_url_list(&self, application_id: ApplicationId) -> Vec<CallbackUrlRecord> {
        self.store().list_callback_urls(application_id)
    }

    /// Removes a callback URL.
    pub fn remove_callback_url(&self, id: Uuid) -> bool {
        self.store().delete_callback_url(id)
    }
}

fn validate_callback_url(url: &str) -> ServiceResult<()> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => {
            warn!(url, "invalid callback URL");
            Err(ServiceError::InvalidUrlFormat)
        }
    }
}
