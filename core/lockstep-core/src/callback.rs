//! Fire-and-forget callback delivery.
//!
//! After a committed activation change, the service builds one JSON payload
//! per registered callback URL and pushes it into a [`CallbackSink`].
//! Delivery never blocks the handler and never rolls back a transition:
//! the HTTP sink drops payloads when its queue is full and only logs
//! delivery failures.

use crate::{Service, ServiceConfig};
use lockstep_store::{ActivationRecord, CallbackUrlRecord};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

/// Queue depth of the HTTP sink.
const QUEUE_CAPACITY: usize = 1024;

/// Destination of callback payloads.
pub trait CallbackSink: Send + Sync {
    /// Enqueues one payload for delivery. Must not block.
    fn deliver(&self, url: String, payload: Value);
}

/// Sink that discards everything. Useful for tests and tools.
#[derive(Debug, Default)]
pub struct NullCallbackSink;

impl CallbackSink for NullCallbackSink {
    fn deliver(&self, _url: String, _payload: Value) {}
}

/// Sink that POSTs payloads from a bounded queue on a background task.
pub struct HttpCallbackSink {
    sender: mpsc::Sender<(String, Value)>,
}

impl HttpCallbackSink {
    /// Builds the HTTP client from service configuration and spawns the
    /// delivery task on the current tokio runtime.
    pub fn spawn(config: &ServiceConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.http_connection_timeout);
        if let Some(proxy) = &config.http_proxy {
            let mut p = reqwest::Proxy::all(format!("http://{}:{}", proxy.host, proxy.port))?;
            if let Some(username) = &proxy.username {
                p = p.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            builder = builder.proxy(p);
        }
        let client = builder.build()?;

        let (sender, mut receiver) = mpsc::channel::<(String, Value)>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some((url, payload)) = receiver.recv().await {
                match client.post(&url).json(&payload).send().await {
                    Ok(response) if !response.status().is_success() => {
                        warn!(url = %url, status = %response.status(), "callback failed");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(url = %url, error = %err, "callback failed");
                    }
                }
            }
        });

        Ok(Self { sender })
    }
}

impl CallbackSink for HttpCallbackSink {
    fn deliver(&self, url: String, payload: Value) {
        if self.sender.try_send((url.clone(), payload)).is_err() {
            warn!(url = %url, "callback queue full, dropping notification");
        }
    }
}

/// Builds the payload for one callback URL, honoring its attribute
/// selection. The activation id is always present.
#[must_use]
pub fn build_callback_payload(callback: &CallbackUrlRecord, activation: &ActivationRecord) -> Value {
    let mut payload = json!({
        "activationId": activation.activation_id.to_string(),
    });
    let fields = payload.as_object_mut().expect("payload is an object");

    if callback.attributes.contains("userId") {
        fields.insert("userId".to_string(), json!(activation.user_id));
    }
    if callback.attributes.contains("activationName") {
        fields.insert("activationName".to_string(), json!(activation.activation_name));
    }
    if callback.attributes.contains("activationStatus") {
        fields.insert("activationStatus".to_string(), json!(activation.status));
    }
    if callback.attributes.contains("blockedReason") {
        fields.insert("blockedReason".to_string(), json!(activation.blocked_reason));
    }
    if callback.attributes.contains("applicationId") {
        fields.insert("applicationId".to_string(), json!(activation.application_id));
    }
    if callback.attributes.contains("activationFlags") {
        fields.insert("activationFlags".to_string(), json!(activation.flags));
    }
    payload
}

impl Service {
    /// Notifies every callback registered for the activation's application.
    /// Called after a transition is committed; failures never propagate.
    pub(crate) fn notify_callbacks(&self, activation: &ActivationRecord) {
        let callbacks = self.store().list_callback_urls(activation.application_id);
        for callback in callbacks {
            let payload = build_callback_payload(&callback, activation);
            self.callbacks.deliver(callback.url.clone(), payload);
        }
    }
}
