//! Persisted entities.
//!
//! Secret columns (activation server private keys, recovery PUK hashes) are
//! stored as [`EncryptedValue`]s tagged with their at-rest encryption mode.

use chrono::{DateTime, Utc};
use lockstep_crypto::at_rest::EncryptedValue;
use lockstep_types::{
    ActivationId, ActivationStatus, ApplicationId, RecoveryCodeStatus, RecoveryPukStatus,
    SignatureType, TokenId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// An application tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    pub roles: Vec<String>,
}

/// A released client version of an application.
///
/// `application_key` publicly identifies the version across all
/// applications; `application_secret` is the bearer secret bound into the
/// ECIES `sharedInfo2` parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationVersion {
    pub id: u64,
    pub application_id: ApplicationId,
    pub name: String,
    pub application_key: String,
    pub application_secret: String,
    pub supported: bool,
}

/// Per-application root EC key pair.
///
/// The newest pair by creation time is the current one; it signs activation
/// codes and decrypts application-scope ECIES envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKeyPair {
    pub id: u64,
    pub application_id: ApplicationId,
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The central entity: one device↔user binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub activation_id: ActivationId,
    pub application_id: ApplicationId,
    pub user_id: String,
    pub activation_name: Option<String>,
    pub activation_code: String,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    /// Legacy numeric counter (protocol v2); kept through upgrades.
    pub counter: u64,
    /// Hash-based counter state (protocol v3).
    pub ctr_data: Option<[u8; 16]>,
    pub device_public_key: Option<Vec<u8>>,
    pub server_private_key: EncryptedValue,
    pub server_public_key: Vec<u8>,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub master_keypair_id: u64,
    /// Protocol version; unknown until the device completes key exchange.
    pub version: Option<u8>,
    pub extras: Option<String>,
    pub flags: Vec<String>,
}

/// A recovery code with its PUKs, rooted at the owning activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCodeRecord {
    pub id: u64,
    pub application_id: ApplicationId,
    pub user_id: String,
    pub activation_id: Option<ActivationId>,
    pub recovery_code: String,
    pub status: RecoveryCodeStatus,
    pub failed_attempts: u64,
    pub max_failed_attempts: u64,
    pub created_at: DateTime<Utc>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub puks: Vec<RecoveryPukRecord>,
}

impl RecoveryCodeRecord {
    /// The lowest-index PUK still in `VALID` state, if any.
    #[must_use]
    pub fn first_valid_puk(&self) -> Option<&RecoveryPukRecord> {
        self.puks
            .iter()
            .filter(|p| p.status == RecoveryPukStatus::Valid)
            .min_by_key(|p| p.puk_index)
    }

    /// Mutable variant of [`first_valid_puk`](Self::first_valid_puk).
    pub fn first_valid_puk_mut(&mut self) -> Option<&mut RecoveryPukRecord> {
        self.puks
            .iter_mut()
            .filter(|p| p.status == RecoveryPukStatus::Valid)
            .min_by_key(|p| p.puk_index)
    }
}

/// One PUK belonging to a recovery code. Stored hashed, with the hash
/// protected by the at-rest codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPukRecord {
    pub puk_index: u64,
    pub puk_hash: EncryptedValue,
    pub status: RecoveryPukStatus,
    pub last_changed_at: Option<DateTime<Utc>>,
}

/// A vended authentication token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: TokenId,
    pub token_secret: Vec<u8>,
    pub activation_id: ActivationId,
    pub signature_type_created: SignatureType,
    pub created_at: DateTime<Utc>,
}

/// A registered callback endpoint.
///
/// `attributes` selects which activation fields the callback payload
/// carries beyond the activation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackUrlRecord {
    pub id: Uuid,
    pub application_id: ApplicationId,
    pub name: String,
    pub url: String,
    pub attributes: BTreeSet<String>,
}

/// Credentials of a master back-end integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRecord {
    pub id: Uuid,
    pub name: String,
    pub client_token: String,
    pub client_secret: String,
}

/// Per-application recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub application_id: ApplicationId,
    pub activation_recovery_enabled: bool,
}

/// One entry in the activation history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationHistoryRecord {
    pub id: u64,
    pub activation_id: ActivationId,
    pub status: ActivationStatus,
    pub event_reason: Option<String>,
    pub external_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One entry in the signature audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureAuditRecord {
    pub id: u64,
    pub activation_id: ActivationId,
    pub application_id: ApplicationId,
    pub user_id: String,
    pub counter: u64,
    pub ctr_data: Option<[u8; 16]>,
    pub signature_type: SignatureType,
    pub signature: String,
    pub data: Vec<u8>,
    pub valid: bool,
    pub version: u8,
    pub note: String,
    pub created_at: DateTime<Utc>,
}
