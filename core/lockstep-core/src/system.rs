//! System status and error-code listing.

use crate::{Service, ServiceError};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of `get_system_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatusResponse {
    pub status: String,
    pub application_name: String,
    pub application_display_name: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the error-code listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCodeItem {
    pub code: String,
    pub message: String,
}

impl Service {
    /// Liveness and identity information.
    pub fn get_system_status(&self) -> SystemStatusResponse {
        SystemStatusResponse {
            status: "OK".to_string(),
            application_name: self.config().application_name.clone(),
            application_display_name: self.config().application_display_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Every error code this server can return, with its message.
    pub fn get_error_code_list(&self) -> Vec<ErrorCodeItem> {
        ServiceError::error_code_list()
            .into_iter()
            .map(|(code, message)| ErrorCodeItem {
                code: code.to_string(),
                message,
            })
            .collect()
    }
}
