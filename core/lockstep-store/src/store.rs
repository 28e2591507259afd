//! The in-memory store and its row-locking discipline.

use crate::error::{StorageError, StorageResult};
use crate::model::*;
use chrono::{DateTime, Utc};
use lockstep_types::{ActivationId, ActivationStatus, ApplicationId, TokenId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Owned pessimistic write lock over one activation row.
pub type ActivationGuard =
    parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ActivationRecord>;

/// Owned pessimistic write lock over one recovery code row.
pub type RecoveryCodeGuard =
    parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, RecoveryCodeRecord>;

/// Owner of all persisted rows.
#[derive(Default)]
pub struct Store {
    applications: RwLock<HashMap<ApplicationId, Application>>,
    versions: RwLock<HashMap<u64, ApplicationVersion>>,
    master_key_pairs: RwLock<HashMap<u64, MasterKeyPair>>,
    activations: RwLock<HashMap<ActivationId, Arc<Mutex<ActivationRecord>>>>,
    recovery_codes: RwLock<HashMap<u64, Arc<Mutex<RecoveryCodeRecord>>>>,
    recovery_configs: RwLock<HashMap<ApplicationId, RecoveryConfig>>,
    tokens: RwLock<HashMap<TokenId, TokenRecord>>,
    callbacks: RwLock<HashMap<Uuid, CallbackUrlRecord>>,
    integrations: RwLock<HashMap<Uuid, IntegrationRecord>>,
    history: RwLock<Vec<ActivationHistoryRecord>>,
    audit: RwLock<Vec<SignatureAuditRecord>>,
    next_application_id: AtomicU64,
    next_version_id: AtomicU64,
    next_master_key_pair_id: AtomicU64,
    next_recovery_code_id: AtomicU64,
    next_history_id: AtomicU64,
    next_audit_id: AtomicU64,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ── applications ─────────────────────────────────────────────────

    /// Creates an application.
    pub fn create_application(&self, name: &str) -> Application {
        let application = Application {
            id: ApplicationId(Self::next_id(&self.next_application_id)),
            name: name.to_string(),
            roles: Vec::new(),
        };
        self.applications
            .write()
            .insert(application.id, application.clone());
        application
    }

    /// Looks up an application by id.
    pub fn find_application(&self, id: ApplicationId) -> Option<Application> {
        self.applications.read().get(&id).cloned()
    }

    /// All applications, ordered by id.
    pub fn list_applications(&self) -> Vec<Application> {
        let mut apps: Vec<_> = self.applications.read().values().cloned().collect();
        apps.sort_by_key(|a| a.id);
        apps
    }

    // ── application versions ─────────────────────────────────────────

    /// Creates an application version with pre-generated credentials.
    pub fn create_application_version(
        &self,
        application_id: ApplicationId,
        name: &str,
        application_key: &str,
        application_secret: &str,
    ) -> StorageResult<ApplicationVersion> {
        if self.find_application(application_id).is_none() {
            return Err(StorageError::NotFound(format!(
                "application {application_id}"
            )));
        }
        let mut versions = self.versions.write();
        if versions
            .values()
            .any(|v| v.application_key == application_key)
        {
            return Err(StorageError::Conflict(format!(
                "application key {application_key}"
            )));
        }
        let version = ApplicationVersion {
            id: Self::next_id(&self.next_version_id),
            application_id,
            name: name.to_string(),
            application_key: application_key.to_string(),
            application_secret: application_secret.to_string(),
            supported: true,
        };
        versions.insert(version.id, version.clone());
        Ok(version)
    }

    /// Looks up a version by its public application key.
    pub fn find_version_by_application_key(&self, application_key: &str) -> Option<ApplicationVersion> {
        self.versions
            .read()
            .values()
            .find(|v| v.application_key == application_key)
            .cloned()
    }

    /// Versions of one application, ordered by id.
    pub fn list_application_versions(&self, application_id: ApplicationId) -> Vec<ApplicationVersion> {
        let mut versions: Vec<_> = self
            .versions
            .read()
            .values()
            .filter(|v| v.application_id == application_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.id);
        versions
    }

    /// Flips the supported flag of a version.
    pub fn set_version_supported(
        &self,
        version_id: u64,
        supported: bool,
    ) -> StorageResult<ApplicationVersion> {
        let mut versions = self.versions.write();
        let version = versions
            .get_mut(&version_id)
            .ok_or_else(|| StorageError::NotFound(format!("application version {version_id}")))?;
        version.supported = supported;
        Ok(version.clone())
    }

    // ── master key pairs ─────────────────────────────────────────────

    /// Stores a new master key pair.
    pub fn create_master_key_pair(
        &self,
        application_id: ApplicationId,
        private_key: Vec<u8>,
        public_key: Vec<u8>,
    ) -> StorageResult<MasterKeyPair> {
        if self.find_application(application_id).is_none() {
            return Err(StorageError::NotFound(format!(
                "application {application_id}"
            )));
        }
        let pair = MasterKeyPair {
            id: Self::next_id(&self.next_master_key_pair_id),
            application_id,
            private_key,
            public_key,
            created_at: Utc::now(),
        };
        self.master_key_pairs.write().insert(pair.id, pair.clone());
        Ok(pair)
    }

    /// The current (latest) master key pair of an application.
    pub fn latest_master_key_pair(&self, application_id: ApplicationId) -> Option<MasterKeyPair> {
        self.master_key_pairs
            .read()
            .values()
            .filter(|p| p.application_id == application_id)
            .max_by_key(|p| (p.created_at, p.id))
            .cloned()
    }

    // ── activations ──────────────────────────────────────────────────

    /// Inserts a freshly initialized activation.
    pub fn insert_activation(&self, record: ActivationRecord) -> StorageResult<()> {
        let mut activations = self.activations.write();
        if activations.contains_key(&record.activation_id) {
            return Err(StorageError::Conflict(format!(
                "activation {}",
                record.activation_id
            )));
        }
        activations.insert(record.activation_id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// True when an activation with this id exists.
    pub fn activation_exists(&self, id: ActivationId) -> bool {
        self.activations.read().contains_key(&id)
    }

    /// Snapshot read without locking.
    pub fn find_activation(&self, id: ActivationId) -> Option<ActivationRecord> {
        let arc = self.activations.read().get(&id).cloned()?;
        let record = arc.lock().clone();
        Some(record)
    }

    /// Acquires the row-level write lock for a state transition.
    pub fn find_activation_with_lock(&self, id: ActivationId) -> Option<ActivationGuard> {
        let arc = self.activations.read().get(&id).cloned()?;
        Some(arc.lock_arc())
    }

    /// Locates a pending activation by code for the prepare step
    /// (no lock; the caller re-acquires by id under lock and handles
    /// expiry there).
    pub fn find_created_activation(
        &self,
        application_id: ApplicationId,
        activation_code: &str,
    ) -> Option<ActivationRecord> {
        let activations = self.activations.read();
        for arc in activations.values() {
            let record = arc.lock();
            if record.application_id == application_id
                && record.activation_code == activation_code
                && record.status == ActivationStatus::Created
            {
                return Some(record.clone());
            }
        }
        None
    }

    /// True when a pending activation already uses this code within the
    /// application. Used for rejection sampling during code generation.
    pub fn activation_code_in_use(&self, application_id: ApplicationId, code: &str) -> bool {
        let activations = self.activations.read();
        activations.values().any(|arc| {
            let record = arc.lock();
            record.application_id == application_id
                && record.activation_code == code
                && record.status == ActivationStatus::Created
        })
    }

    /// Activations of one user, optionally narrowed to an application.
    pub fn find_activations_by_user(
        &self,
        application_id: Option<ApplicationId>,
        user_id: &str,
    ) -> Vec<ActivationRecord> {
        let activations = self.activations.read();
        let mut result: Vec<_> = activations
            .values()
            .map(|arc| arc.lock().clone())
            .filter(|r| r.user_id == user_id)
            .filter(|r| application_id.map_or(true, |id| r.application_id == id))
            .collect();
        result.sort_by_key(|r| r.created_at);
        result
    }

    /// Multi-criteria activation query.
    pub fn lookup_activations(
        &self,
        user_ids: &[String],
        application_ids: Option<&[ApplicationId]>,
        last_used_before: Option<DateTime<Utc>>,
        last_used_after: Option<DateTime<Utc>>,
        statuses: &[ActivationStatus],
    ) -> Vec<ActivationRecord> {
        let activations = self.activations.read();
        let mut result: Vec<_> = activations
            .values()
            .map(|arc| arc.lock().clone())
            .filter(|r| user_ids.contains(&r.user_id))
            .filter(|r| application_ids.map_or(true, |ids| ids.contains(&r.application_id)))
            .filter(|r| last_used_before.map_or(true, |t| r.last_used_at < t))
            .filter(|r| last_used_after.map_or(true, |t| r.last_used_at >= t))
            .filter(|r| statuses.contains(&r.status))
            .collect();
        result.sort_by_key(|r| r.created_at);
        result
    }

    // ── recovery codes ───────────────────────────────────────────────

    /// Inserts a recovery code, assigning its id.
    pub fn insert_recovery_code(&self, mut record: RecoveryCodeRecord) -> RecoveryCodeRecord {
        record.id = Self::next_id(&self.next_recovery_code_id);
        self.recovery_codes
            .write()
            .insert(record.id, Arc::new(Mutex::new(record.clone())));
        record
    }

    /// True when this recovery code value already exists in the application.
    pub fn recovery_code_in_use(&self, application_id: ApplicationId, code: &str) -> bool {
        let codes = self.recovery_codes.read();
        codes.values().any(|arc| {
            let record = arc.lock();
            record.application_id == application_id && record.recovery_code == code
        })
    }

    /// Snapshot read by (application, code value).
    pub fn find_recovery_code(
        &self,
        application_id: ApplicationId,
        recovery_code: &str,
    ) -> Option<RecoveryCodeRecord> {
        let codes = self.recovery_codes.read();
        for arc in codes.values() {
            let record = arc.lock();
            if record.application_id == application_id && record.recovery_code == recovery_code {
                return Some(record.clone());
            }
        }
        None
    }

    /// Acquires the row lock of a recovery code by id.
    pub fn find_recovery_code_with_lock(&self, id: u64) -> Option<RecoveryCodeGuard> {
        let arc = self.recovery_codes.read().get(&id).cloned()?;
        Some(arc.lock_arc())
    }

    /// Recovery codes tied to one activation.
    pub fn find_recovery_codes_by_activation(
        &self,
        application_id: ApplicationId,
        activation_id: ActivationId,
    ) -> Vec<RecoveryCodeRecord> {
        let codes = self.recovery_codes.read();
        let mut result: Vec<_> = codes
            .values()
            .map(|arc| arc.lock().clone())
            .filter(|r| {
                r.application_id == application_id && r.activation_id == Some(activation_id)
            })
            .collect();
        result.sort_by_key(|r| r.id);
        result
    }

    // ── recovery config ──────────────────────────────────────────────

    /// Recovery settings of an application, if configured.
    pub fn find_recovery_config(&self, application_id: ApplicationId) -> Option<RecoveryConfig> {
        self.recovery_configs.read().get(&application_id).cloned()
    }

    /// Creates or replaces the recovery settings of an application.
    pub fn set_recovery_config(&self, config: RecoveryConfig) {
        self.recovery_configs
            .write()
            .insert(config.application_id, config);
    }

    // ── tokens ───────────────────────────────────────────────────────

    /// Inserts a token.
    pub fn insert_token(&self, record: TokenRecord) -> StorageResult<()> {
        let mut tokens = self.tokens.write();
        if tokens.contains_key(&record.token_id) {
            return Err(StorageError::Conflict(format!("token {}", record.token_id)));
        }
        tokens.insert(record.token_id.clone(), record);
        Ok(())
    }

    /// True when a token with this id exists.
    pub fn token_exists(&self, token_id: &TokenId) -> bool {
        self.tokens.read().contains_key(token_id)
    }

    /// Snapshot read of a token.
    pub fn find_token(&self, token_id: &TokenId) -> Option<TokenRecord> {
        self.tokens.read().get(token_id).cloned()
    }

    /// Deletes a token; returns whether it existed.
    pub fn delete_token(&self, token_id: &TokenId) -> bool {
        self.tokens.write().remove(token_id).is_some()
    }

    // ── callback URLs ────────────────────────────────────────────────

    /// Registers a callback URL.
    pub fn insert_callback_url(&self, record: CallbackUrlRecord) {
        self.callbacks.write().insert(record.id, record);
    }

    /// Looks up a callback URL by id.
    pub fn find_callback_url(&self, id: Uuid) -> Option<CallbackUrlRecord> {
        self.callbacks.read().get(&id).cloned()
    }

    /// Replaces an existing callback URL.
    pub fn update_callback_url(&self, record: CallbackUrlRecord) -> StorageResult<()> {
        let mut callbacks = self.callbacks.write();
        if !callbacks.contains_key(&record.id) {
            return Err(StorageError::NotFound(format!("callback {}", record.id)));
        }
        callbacks.insert(record.id, record);
        Ok(())
    }

    /// Callback URLs of one application, ordered by name.
    pub fn list_callback_urls(&self, application_id: ApplicationId) -> Vec<CallbackUrlRecord> {
        let mut result: Vec<_> = self
            .callbacks
            .read()
            .values()
            .filter(|c| c.application_id == application_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Removes a callback URL; returns whether it existed.
    pub fn delete_callback_url(&self, id: Uuid) -> bool {
        self.callbacks.write().remove(&id).is_some()
    }

    // ── integrations ─────────────────────────────────────────────────

    /// Registers an integration.
    pub fn insert_integration(&self, record: IntegrationRecord) {
        self.integrations.write().insert(record.id, record);
    }

    /// All integrations, ordered by name.
    pub fn list_integrations(&self) -> Vec<IntegrationRecord> {
        let mut result: Vec<_> = self.integrations.read().values().cloned().collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Removes an integration; returns whether it existed.
    pub fn delete_integration(&self, id: Uuid) -> bool {
        self.integrations.write().remove(&id).is_some()
    }

    // ── activation history ───────────────────────────────────────────

    /// Appends an activation history entry.
    pub fn append_activation_history(
        &self,
        activation_id: ActivationId,
        status: ActivationStatus,
        event_reason: Option<String>,
        external_user_id: Option<String>,
    ) {
        let record = ActivationHistoryRecord {
            id: Self::next_id(&self.next_history_id),
            activation_id,
            status,
            event_reason,
            external_user_id,
            created_at: Utc::now(),
        };
        self.history.write().push(record);
    }

    /// History entries of one activation within a time window.
    pub fn list_activation_history(
        &self,
        activation_id: ActivationId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<ActivationHistoryRecord> {
        self.history
            .read()
            .iter()
            .filter(|h| h.activation_id == activation_id)
            .filter(|h| h.created_at >= from && h.created_at <= to)
            .cloned()
            .collect()
    }

    // ── signature audit ──────────────────────────────────────────────

    /// Appends a signature audit entry, assigning its id.
    pub fn append_signature_audit(&self, mut record: SignatureAuditRecord) {
        record.id = Self::next_id(&self.next_audit_id);
        self.audit.write().push(record);
    }

    /// Audit entries of one user within a time window, optionally narrowed
    /// to an application.
    pub fn list_signature_audit(
        &self,
        user_id: &str,
        application_id: Option<ApplicationId>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<SignatureAuditRecord> {
        self.audit
            .read()
            .iter()
            .filter(|a| a.user_id == user_id)
            .filter(|a| application_id.map_or(true, |id| a.application_id == id))
            .filter(|a| a.created_at >= from && a.created_at <= to)
            .cloned()
            .collect()
    }
}
