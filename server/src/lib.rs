//! HTTP API for the Lockstep server.
//!
//! A thin JSON facade over [`lockstep_core::Service`]: system status, error
//! codes, and the activation endpoints a master back-end drives. Request
//! marshaling stays here; all business rules live in the core.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use lockstep_core::{Service, ServiceError};
use lockstep_types::{ActivationId, ApplicationId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Error body returned for failed requests.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_puk_index: Option<u64>,
}

struct ApiError(ServiceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::ActivationNotFound => StatusCode::NOT_FOUND,
            ServiceError::Unknown(_) | ServiceError::GenericCryptographyError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        let current_puk_index = match &self.0 {
            ServiceError::InvalidRecoveryCode { current_puk_index } => *current_puk_index,
            _ => None,
        };
        let body = ErrorResponse {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
            current_puk_index,
        };
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitActivationRequest {
    pub application_id: u64,
    pub user_id: String,
    #[serde(default)]
    pub max_failure_count: Option<u64>,
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitActivationResponseDto {
    pub activation_id: String,
    pub activation_code: String,
    /// Base64 of the master-key ECDSA signature over the code.
    pub activation_signature: String,
    pub user_id: String,
    pub application_id: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ActivationStatusDto {
    pub activation_id: String,
    pub activation_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    pub user_id: String,
    /// Base64 of the encrypted status blob.
    pub encrypted_status_blob: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_status_blob_nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_public_key_fingerprint: Option<String>,
    pub version: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommitActivationResponseDto {
    pub activation_id: String,
    pub activated: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    /// Base64 challenge for status blob encryption (protocol V3.1).
    #[serde(default)]
    pub challenge: Option<String>,
}

async fn system_status(State(service): State<Arc<Service>>) -> Json<serde_json::Value> {
    let status = service.get_system_status();
    Json(serde_json::to_value(status).expect("status serializes"))
}

async fn error_codes(State(service): State<Arc<Service>>) -> Json<serde_json::Value> {
    let list = service.get_error_code_list();
    Json(serde_json::to_value(list).expect("error codes serialize"))
}

async fn init_activation(
    State(service): State<Arc<Service>>,
    Json(request): Json<InitActivationRequest>,
) -> Result<Json<InitActivationResponseDto>, ApiError> {
    let response = service.init_activation(
        ApplicationId(request.application_id),
        &request.user_id,
        request.max_failure_count,
        request.expire_at,
    )?;
    Ok(Json(InitActivationResponseDto {
        activation_id: response.activation_id.to_string(),
        activation_code: response.activation_code,
        activation_signature: BASE64.encode(response.activation_signature),
        user_id: response.user_id,
        application_id: response.application_id.0,
    }))
}

async fn activation_status(
    State(service): State<Arc<Service>>,
    Path(activation_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ActivationStatusDto>, ApiError> {
    let activation_id =
        ActivationId::parse(&activation_id).map_err(|_| ServiceError::InvalidRequest)?;
    let challenge = match &query.challenge {
        Some(challenge) => Some(
            BASE64
                .decode(challenge)
                .map_err(|_| ServiceError::InvalidRequest)?,
        ),
        None => None,
    };

    let status = service.get_activation_status(activation_id, challenge.as_deref())?;
    let status_json =
        serde_json::to_value(status.status).map_err(|e| ServiceError::Unknown(e.to_string()))?;
    Ok(Json(ActivationStatusDto {
        activation_id: status.activation_id.to_string(),
        activation_status: status_json.as_str().unwrap_or("REMOVED").to_string(),
        blocked_reason: status.blocked_reason,
        user_id: status.user_id,
        encrypted_status_blob: BASE64.encode(status.encrypted_status_blob),
        encrypted_status_blob_nonce: status.status_blob_nonce.map(|n| BASE64.encode(n)),
        activation_code: status.activation_code,
        activation_signature: status.activation_signature.map(|s| BASE64.encode(s)),
        device_public_key_fingerprint: status.device_public_key_fingerprint,
        version: status.version,
    }))
}

async fn commit_activation(
    State(service): State<Arc<Service>>,
    Path(activation_id): Path<String>,
) -> Result<Json<CommitActivationResponseDto>, ApiError> {
    let activation_id =
        ActivationId::parse(&activation_id).map_err(|_| ServiceError::InvalidRequest)?;
    let response = service.commit_activation(activation_id, None)?;
    Ok(Json(CommitActivationResponseDto {
        activation_id: response.activation_id.to_string(),
        activated: response.activated,
    }))
}

/// Build the HTTP API router over a service instance.
pub fn build_router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/api/v1/status", get(system_status))
        .route("/api/v1/error-codes", get(error_codes))
        .route("/api/v1/activation/init", post(init_activation))
        .route("/api/v1/activation/{id}/status", get(activation_status))
        .route("/api/v1/activation/{id}/commit", post(commit_activation))
        .with_state(service)
}
