//! Shared test harness: a service over a fresh in-memory store, plus
//! device-side helpers for building and reading ECIES envelopes.

#![allow(dead_code)]

use lockstep_core::activation::{ActivationLayer2Request, ActivationLayer2Response};
use lockstep_core::{CallbackSink, Service, ServiceConfig};
use lockstep_crypto::ecies::{
    shared_info2_activation, shared_info2_application, EciesCryptogram, EciesEncryptor,
    SH1_ACTIVATION_LAYER_2,
};
use lockstep_crypto::keys::{self, EcKeyPair};
use lockstep_store::Store;
use lockstep_types::ApplicationId;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Callback sink that records every delivery.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub deliveries: Mutex<Vec<(String, Value)>>,
}

impl CallbackSink for RecordingSink {
    fn deliver(&self, url: String, payload: Value) {
        self.deliveries.lock().unwrap().push((url, payload));
    }
}

/// A service plus the application fixture everything runs against.
pub struct TestContext {
    pub service: Service,
    pub store: Arc<Store>,
    pub application_id: ApplicationId,
    pub application_key: String,
    pub application_secret: String,
    pub master_public_key: Vec<u8>,
    pub sink: Arc<RecordingSink>,
}

/// Builds a context with the default configuration.
pub fn setup() -> TestContext {
    setup_with_config(ServiceConfig::default())
}

/// Builds a context with a custom configuration.
pub fn setup_with_config(config: ServiceConfig) -> TestContext {
    let store = Arc::new(Store::new());
    let sink = Arc::new(RecordingSink::default());
    let service = Service::new(Arc::clone(&store), config, Arc::clone(&sink) as Arc<dyn CallbackSink>);

    let detail = service.create_application("test-app").unwrap();
    let version = detail.versions[0].clone();

    TestContext {
        service,
        store,
        application_id: detail.application.id,
        application_key: version.application_key,
        application_secret: version.application_secret,
        master_public_key: detail.master_public_key,
        sink,
    }
}

impl TestContext {
    /// Device-side encryptor for the activation layer-2 scope.
    pub fn layer2_encryptor(&self) -> EciesEncryptor {
        let master_public = keys::public_key_from_bytes(&self.master_public_key).unwrap();
        let shared_info2 = shared_info2_application(self.application_secret.as_bytes());
        EciesEncryptor::new(master_public, SH1_ACTIVATION_LAYER_2, shared_info2)
    }

    /// Builds a layer-2 activation request cryptogram for a device key.
    pub fn activation_cryptogram(
        &self,
        encryptor: &mut EciesEncryptor,
        device: &EcKeyPair,
        activation_name: &str,
    ) -> EciesCryptogram {
        let request = ActivationLayer2Request {
            device_public_key: BASE64.encode(device.public_key_bytes()),
            activation_name: Some(activation_name.to_string()),
            extras: None,
        };
        let bytes = serde_json::to_vec(&request).unwrap();
        encryptor.encrypt_request(&bytes, true).unwrap()
    }

    /// Decrypts and parses a layer-2 activation response.
    pub fn decode_layer2_response(
        &self,
        encryptor: &EciesEncryptor,
        cryptogram: &EciesCryptogram,
    ) -> ActivationLayer2Response {
        let bytes = encryptor.decrypt_response(cryptogram).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Device-side encryptor for an activation-scope operation.
    ///
    /// Requires the paired device key and the server public key returned in
    /// the layer-2 response.
    pub fn activation_scope_encryptor(
        &self,
        shared_info1: &[u8],
        device: &EcKeyPair,
        server_public_key: &[u8],
    ) -> EciesEncryptor {
        let server_public = keys::public_key_from_bytes(server_public_key).unwrap();
        let transport_key = keys::derive_transport_key(device.private_key(), &server_public);
        let shared_info2 = shared_info2_activation(
            self.application_secret.as_bytes(),
            Some(transport_key.as_bytes()),
        );
        EciesEncryptor::new(server_public, shared_info1, shared_info2)
    }

    /// The device↔server shared secret, from the device's perspective.
    pub fn device_shared_secret(&self, device: &EcKeyPair, server_public_key: &[u8]) -> Vec<u8> {
        let server_public = keys::public_key_from_bytes(server_public_key).unwrap();
        keys::shared_secret(device.private_key(), &server_public)
            .as_bytes()
            .to_vec()
    }
}

/// Runs the full init → prepare flow, returning the activation id, the
/// device key pair and the layer-2 response.
pub fn paired_activation(
    ctx: &TestContext,
    user_id: &str,
) -> (
    lockstep_types::ActivationId,
    EcKeyPair,
    ActivationLayer2Response,
) {
    let init = ctx
        .service
        .init_activation(ctx.application_id, user_id, None, None)
        .unwrap();

    let device = EcKeyPair::generate();
    let mut encryptor = ctx.layer2_encryptor();
    let cryptogram = ctx.activation_cryptogram(&mut encryptor, &device, "test device");
    let prepared = ctx
        .service
        .prepare_activation(&init.activation_code, &ctx.application_key, &cryptogram)
        .unwrap();
    let response = ctx.decode_layer2_response(&encryptor, &prepared.cryptogram);

    (prepared.activation_id, device, response)
}

/// Runs init → prepare → commit, returning a fully active activation.
pub fn active_activation(
    ctx: &TestContext,
    user_id: &str,
) -> (
    lockstep_types::ActivationId,
    EcKeyPair,
    ActivationLayer2Response,
) {
    let (activation_id, device, response) = paired_activation(ctx, user_id);
    ctx.service.commit_activation(activation_id, None).unwrap();
    (activation_id, device, response)
}
