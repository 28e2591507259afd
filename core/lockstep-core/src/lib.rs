//! Service layer of the Lockstep server.
//!
//! [`Service`] is the single entry point the RPC facade consumes. Each
//! subsystem contributes its operations from its own module:
//! - [`activation`] — the activation lifecycle state machine
//! - [`recovery`] — recovery codes and PUK verification
//! - [`token`] — token issuance and digest validation
//! - [`signature`] — online/offline signature verification and audit
//! - [`vault`] — vault unlock
//! - [`upgrade`] — protocol v2→v3 counter migration
//! - [`ecies_export`] — decryptor parameters for a mediating server
//! - [`application`] — application/version/integration/callback CRUD
//! - [`system`] — system status and error code listing
//!
//! Handlers are synchronous; the only asynchronous seam is the
//! fire-and-forget callback sink ([`callback`]).

pub mod activation;
pub mod application;
pub mod callback;
mod config;
pub mod ecies_export;
mod error;
pub mod recovery;
pub mod signature;
pub mod system;
pub mod token;
pub mod upgrade;
pub mod vault;

use lockstep_crypto::at_rest::KeyAtRestCodec;
use lockstep_store::Store;
use std::sync::Arc;

pub use callback::{CallbackSink, HttpCallbackSink, NullCallbackSink};
pub use config::{HttpProxyConfig, ServiceConfig};
pub use error::{ServiceError, ServiceResult};

/// Protocol major version spoken by this server. Activations created with a
/// lower version are offered an upgrade to it.
pub const PROTOCOL_VERSION: u8 = 3;

/// The service facade: owns the store, configuration, the at-rest codec and
/// the callback sink.
pub struct Service {
    store: Arc<Store>,
    config: ServiceConfig,
    codec: KeyAtRestCodec,
    callbacks: Arc<dyn CallbackSink>,
}

impl Service {
    /// Creates a service over the given store and configuration.
    #[must_use]
    pub fn new(store: Arc<Store>, config: ServiceConfig, callbacks: Arc<dyn CallbackSink>) -> Self {
        let codec = KeyAtRestCodec::new(config.master_at_rest_secret.as_deref());
        Self {
            store,
            config,
            codec,
            callbacks,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The service configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn codec(&self) -> &KeyAtRestCodec {
        &self.codec
    }
}
