use lockstep_core::{NullCallbackSink, Service, ServiceConfig};
use lockstep_server::{
    build_router, ActivationStatusDto, CommitActivationResponseDto, ErrorResponse,
    InitActivationRequest, InitActivationResponseDto,
};
use lockstep_store::Store;
use std::sync::Arc;

struct TestServer {
    base: String,
    service: Arc<Service>,
    application_id: u64,
}

/// Spin up the HTTP server on an OS-assigned port, returning the base URL
/// and the provisioned application.
async fn spawn_test_server() -> TestServer {
    let store = Arc::new(Store::new());
    let service = Arc::new(Service::new(
        store,
        ServiceConfig::default(),
        Arc::new(NullCallbackSink),
    ));
    let detail = service.create_application("api-test").unwrap();

    let app = build_router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://127.0.0.1:{}", port),
        service,
        application_id: detail.application.id.0,
    }
}

#[tokio::test]
async fn status_endpoint_reports_ok() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(format!("{}/api/v1/status", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "OK");
    assert_eq!(body["applicationName"], "lockstep-server");
}

#[tokio::test]
async fn error_codes_endpoint_lists_codes() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(format!("{}/api/v1/error-codes", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let codes: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["code"].as_str().unwrap())
        .collect();
    assert!(codes.contains(&"ACTIVATION_NOT_FOUND"));
    assert!(codes.contains(&"DECRYPTION_FAILED"));
}

#[tokio::test]
async fn init_and_commit_flow_over_http() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();

    let init: InitActivationResponseDto = client
        .post(format!("{}/api/v1/activation/init", server.base))
        .json(&InitActivationRequest {
            application_id: server.application_id,
            user_id: "alice".to_string(),
            max_failure_count: None,
            expire_at: None,
        })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(init.user_id, "alice");
    assert_eq!(init.activation_code.len(), 23);

    // Status of a CREATED activation carries the code and its signature.
    let status: ActivationStatusDto = client
        .get(format!(
            "{}/api/v1/activation/{}/status",
            server.base, init.activation_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status.activation_status, "CREATED");
    assert_eq!(status.activation_code.as_deref(), Some(init.activation_code.as_str()));
    assert!(status.activation_signature.is_some());

    // Commit before key exchange is an incorrect state.
    let resp = client
        .post(format!(
            "{}/api/v1/activation/{}/commit",
            server.base, init.activation_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let error: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(error.code, "ACTIVATION_INCORRECT_STATE");

    // Complete the pairing through the service, then commit over HTTP.
    let record = {
        use lockstep_types::ActivationId;
        let id = ActivationId::parse(&init.activation_id).unwrap();
        // Simulate the device by driving the core directly.
        let store = server.service.store();
        let mut guard = store.find_activation_with_lock(id).unwrap();
        guard.status = lockstep_types::ActivationStatus::OtpUsed;
        guard.device_public_key = Some(vec![2; 33]);
        guard.ctr_data = Some([1u8; 16]);
        guard.version = Some(3);
        id
    };
    let committed: CommitActivationResponseDto = client
        .post(format!(
            "{}/api/v1/activation/{}/commit",
            server.base, record
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(committed.activated);
}

#[tokio::test]
async fn unknown_activation_status_is_removed() {
    let server = spawn_test_server().await;
    let status: ActivationStatusDto = reqwest::get(format!(
        "{}/api/v1/activation/{}/status",
        server.base,
        uuid::Uuid::new_v4()
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(status.activation_status, "REMOVED");
    assert!(!status.encrypted_status_blob.is_empty());
}

#[tokio::test]
async fn malformed_activation_id_is_rejected() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(format!(
        "{}/api/v1/activation/not-a-uuid/status",
        server.base
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 400);
    let error: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(error.code, "INVALID_REQUEST");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let server = spawn_test_server().await;
    let resp = reqwest::get(format!("{}/api/v1/nonexistent", server.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
