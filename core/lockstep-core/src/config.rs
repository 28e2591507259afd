//! Service configuration.

use chrono::Duration;

/// Outbound HTTP proxy settings for callback delivery.
#[derive(Debug, Clone)]
pub struct HttpProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Tunables of the service core.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Master secret protecting server private keys and PUK hashes at rest.
    /// `None` stores new records unencrypted.
    pub master_at_rest_secret: Option<Vec<u8>>,
    /// Rejection-sampling bound when generating activation IDs.
    pub activation_id_iterations: u32,
    /// Rejection-sampling bound when generating activation codes.
    pub activation_code_iterations: u32,
    /// Rejection-sampling bound when generating token IDs.
    pub token_id_iterations: u32,
    /// Rejection-sampling bound when generating recovery codes.
    pub recovery_code_iterations: u32,
    /// Default failed-attempt limit for new activations.
    pub default_max_failed_attempts: u64,
    /// Failed-attempt limit for recovery codes.
    pub recovery_max_failed_attempts: u64,
    /// Look-ahead window searched during signature verification.
    pub signature_validation_lookahead: u64,
    /// How long a new activation stays completable before it expires.
    pub activation_validity: Duration,
    /// Connection timeout for callback delivery.
    pub http_connection_timeout: std::time::Duration,
    /// Optional proxy for callback delivery.
    pub http_proxy: Option<HttpProxyConfig>,
    /// Machine name reported by the system status call.
    pub application_name: String,
    /// Human-readable name reported by the system status call.
    pub application_display_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            master_at_rest_secret: None,
            activation_id_iterations: 10,
            activation_code_iterations: 10,
            token_id_iterations: 10,
            recovery_code_iterations: 10,
            default_max_failed_attempts: 5,
            recovery_max_failed_attempts: 10,
            signature_validation_lookahead: 20,
            activation_validity: Duration::minutes(2),
            http_connection_timeout: std::time::Duration::from_secs(5),
            http_proxy: None,
            application_name: "lockstep-server".to_string(),
            application_display_name: "Lockstep Server".to_string(),
        }
    }
}
