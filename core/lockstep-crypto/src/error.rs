//! Error types for the cryptographic engine.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
///
/// Decryption and MAC failures intentionally carry no detail about which
/// step failed; callers at the service boundary collapse them into a single
/// error code.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key bytes do not decode to a valid EC key.
    #[error("invalid key format")]
    InvalidKeyFormat,

    /// MAC mismatch, bad padding or otherwise undecryptable input.
    #[error("decryption failed")]
    Decryption,

    /// Encryption could not be performed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Input has the wrong length or shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Password hashing backend failure.
    #[error("password hash error: {0}")]
    PasswordHash(String),
}
