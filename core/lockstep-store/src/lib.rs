//! In-memory repository for the Lockstep server.
//!
//! The [`Store`] owns every persisted row. Reads come in two flavors,
//! matching the service-layer locking discipline:
//! - snapshot reads (`find_*`) clone the row and hold no lock;
//! - locked reads (`find_*_with_lock`) return an owned guard that keeps a
//!   row-level pessimistic lock for the duration of a state transition.
//!
//! Handlers that locate a row by secondary index (activation code, recovery
//! code) re-acquire it by primary key under lock before writing.

mod error;
mod model;
mod store;

pub use error::{StorageError, StorageResult};
pub use model::{
    ActivationHistoryRecord, ActivationRecord, Application, ApplicationVersion,
    CallbackUrlRecord, IntegrationRecord, MasterKeyPair, RecoveryCodeRecord, RecoveryConfig,
    RecoveryPukRecord, SignatureAuditRecord, TokenRecord,
};
pub use store::{ActivationGuard, RecoveryCodeGuard, Store};
