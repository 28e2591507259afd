mod common;

use common::{active_activation, setup};
use lockstep_core::callback::{build_callback_payload, CallbackSink, HttpCallbackSink};
use lockstep_core::ServiceConfig;
use lockstep_store::CallbackUrlRecord;
use std::collections::BTreeSet;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn attributes(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn payload_always_carries_activation_id() {
    let ctx = setup();
    let (activation_id, _, _) = active_activation(&ctx, "alice");
    let record = ctx.store.find_activation(activation_id).unwrap();

    let callback = CallbackUrlRecord {
        id: Uuid::new_v4(),
        application_id: ctx.application_id,
        name: "minimal".to_string(),
        url: "https://example.com/hook".to_string(),
        attributes: BTreeSet::new(),
    };
    let payload = build_callback_payload(&callback, &record);
    assert_eq!(
        payload["activationId"].as_str().unwrap(),
        activation_id.to_string()
    );
    assert!(payload.get("userId").is_none());
}

#[test]
fn payload_honors_attribute_selection() {
    let ctx = setup();
    let (activation_id, _, _) = active_activation(&ctx, "alice");
    ctx.service
        .block_activation(activation_id, Some("LOST"), None)
        .unwrap();
    let record = ctx.store.find_activation(activation_id).unwrap();

    let callback = CallbackUrlRecord {
        id: Uuid::new_v4(),
        application_id: ctx.application_id,
        name: "full".to_string(),
        url: "https://example.com/hook".to_string(),
        attributes: attributes(&[
            "userId",
            "activationName",
            "activationStatus",
            "blockedReason",
            "applicationId",
        ]),
    };
    let payload = build_callback_payload(&callback, &record);
    assert_eq!(payload["userId"], "alice");
    assert_eq!(payload["activationName"], "test device");
    assert_eq!(payload["activationStatus"], "BLOCKED");
    assert_eq!(payload["blockedReason"], "LOST");
    assert_eq!(payload["applicationId"], ctx.application_id.0);
}

#[test]
fn transitions_notify_registered_callbacks() {
    let ctx = setup();
    ctx.service
        .create_callback_url(
            ctx.application_id,
            "hook",
            "https://example.com/hook",
            attributes(&["activationStatus"]),
        )
        .unwrap();

    let (activation_id, _, _) = active_activation(&ctx, "alice");
    ctx.service.remove_activation(activation_id, None).unwrap();

    let deliveries = ctx.sink.deliveries.lock().unwrap();
    // init, prepare (OTP_USED), commit (ACTIVE), remove (REMOVED).
    assert_eq!(deliveries.len(), 4);
    assert!(deliveries
        .iter()
        .all(|(url, _)| url == "https://example.com/hook"));
    assert_eq!(deliveries[3].1["activationStatus"], "REMOVED");
}

#[test]
fn callback_failure_never_affects_transitions() {
    // A sink that panics would surface as a test failure; one that drops
    // deliveries must leave the state machine untouched.
    let ctx = setup();
    let (activation_id, _, _) = active_activation(&ctx, "alice");
    ctx.service.remove_activation(activation_id, None).unwrap();
    assert_eq!(
        ctx.store.find_activation(activation_id).unwrap().status,
        lockstep_types::ActivationStatus::Removed
    );
}

#[tokio::test]
async fn http_sink_posts_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(serde_json::json!({"activationId": "abc"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = HttpCallbackSink::spawn(&ServiceConfig::default()).unwrap();
    sink.deliver(
        format!("{}/hook", server.uri()),
        serde_json::json!({"activationId": "abc"}),
    );

    // Give the background task a moment to flush the queue.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if !server.received_requests().await.unwrap().is_empty() {
            break;
        }
    }
    server.verify().await;
}

#[tokio::test]
async fn http_sink_survives_unreachable_endpoints() {
    let sink = HttpCallbackSink::spawn(&ServiceConfig::default()).unwrap();
    // No listener on this port; delivery must not panic or block.
    sink.deliver(
        "http://127.0.0.1:1/hook".to_string(),
        serde_json::json!({"activationId": "abc"}),
    );
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
