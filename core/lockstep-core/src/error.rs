//! The service error taxonomy.
//!
//! Every operation returns `Result<T, ServiceError>`. Cryptographic failures
//! collapse into [`ServiceError::DecryptionFailed`] at the boundary so the
//! response never reveals which step failed.

use lockstep_crypto::CryptoError;
use lockstep_store::StorageError;
use thiserror::Error;

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Business errors exposed on the RPC boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("activation with given ID was not found")]
    ActivationNotFound,

    #[error("activation with given ID is expired")]
    ActivationExpired,

    #[error("activation is in incorrect state for this operation")]
    ActivationIncorrectState,

    #[error("application or application version is invalid")]
    InvalidApplication,

    #[error("key with invalid format was provided")]
    InvalidKeyFormat,

    #[error("master server key pair contains private key in incorrect format")]
    IncorrectMasterServerKeypairPrivate,

    #[error("no master server key pair configured for given application")]
    NoMasterServerKeypair,

    #[error("data decryption failed")]
    DecryptionFailed,

    #[error("generic cryptography error")]
    GenericCryptographyError,

    #[error("cryptographic provider is initialized incorrectly")]
    InvalidCryptoProvider,

    #[error("request data have invalid format")]
    InvalidInputFormat,

    #[error("invalid request object was provided")]
    InvalidRequest,

    #[error("user ID was not specified or is invalid")]
    NoUserId,

    #[error("application ID was not specified")]
    NoApplicationId,

    #[error("unable to generate a unique activation ID")]
    UnableToGenerateActivationId,

    #[error("unable to generate a unique activation code")]
    UnableToGenerateActivationCode,

    #[error("unable to generate a unique token ID")]
    UnableToGenerateToken,

    #[error("unable to generate a unique recovery code")]
    UnableToGenerateRecoveryCode,

    #[error("recovery code already exists for given activation")]
    RecoveryCodeAlreadyExists,

    #[error("invalid recovery code or PUK")]
    InvalidRecoveryCode {
        /// Index of the PUK the caller should be asked for, when one is
        /// still valid.
        current_puk_index: Option<u64>,
    },

    #[error("callback URL has invalid format")]
    InvalidUrlFormat,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ServiceError {
    /// Stable error code carried on the wire.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ActivationNotFound => "ACTIVATION_NOT_FOUND",
            Self::ActivationExpired => "ACTIVATION_EXPIRED",
            Self::ActivationIncorrectState => "ACTIVATION_INCORRECT_STATE",
            Self::InvalidApplication => "INVALID_APPLICATION",
            Self::InvalidKeyFormat => "INVALID_KEY_FORMAT",
            Self::IncorrectMasterServerKeypairPrivate => "INCORRECT_MASTER_SERVER_KEYPAIR_PRIVATE",
            Self::NoMasterServerKeypair => "NO_MASTER_SERVER_KEYPAIR",
            Self::DecryptionFailed => "DECRYPTION_FAILED",
            Self::GenericCryptographyError => "GENERIC_CRYPTOGRAPHY_ERROR",
            Self::InvalidCryptoProvider => "INVALID_CRYPTO_PROVIDER",
            Self::InvalidInputFormat => "INVALID_INPUT_FORMAT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NoUserId => "NO_USER_ID",
            Self::NoApplicationId => "NO_APPLICATION_ID",
            Self::UnableToGenerateActivationId => "UNABLE_TO_GENERATE_ACTIVATION_ID",
            Self::UnableToGenerateActivationCode => "UNABLE_TO_GENERATE_ACTIVATION_CODE",
            Self::UnableToGenerateToken => "UNABLE_TO_GENERATE_TOKEN",
            Self::UnableToGenerateRecoveryCode => "UNABLE_TO_GENERATE_RECOVERY_CODE",
            Self::RecoveryCodeAlreadyExists => "RECOVERY_CODE_ALREADY_EXISTS",
            Self::InvalidRecoveryCode { .. } => "INVALID_RECOVERY_CODE",
            Self::InvalidUrlFormat => "INVALID_URL_FORMAT",
            Self::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// All error codes with their messages, for the error-code listing.
    #[must_use]
    pub fn error_code_list() -> Vec<(&'static str, String)> {
        let all = [
            Self::ActivationNotFound,
            Self::ActivationExpired,
            Self::ActivationIncorrectState,
            Self::InvalidApplication,
            Self::InvalidKeyFormat,
            Self::IncorrectMasterServerKeypairPrivate,
            Self::NoMasterServerKeypair,
            Self::DecryptionFailed,
            Self::GenericCryptographyError,
            Self::InvalidCryptoProvider,
            Self::InvalidInputFormat,
            Self::InvalidRequest,
            Self::NoUserId,
            Self::NoApplicationId,
            Self::UnableToGenerateActivationId,
            Self::UnableToGenerateActivationCode,
            Self::UnableToGenerateToken,
            Self::UnableToGenerateRecoveryCode,
            Self::RecoveryCodeAlreadyExists,
            Self::InvalidRecoveryCode {
                current_puk_index: None,
            },
            Self::InvalidUrlFormat,
            Self::Unknown(String::new()),
        ];
        all.iter().map(|e| (e.code(), e.to_string())).collect()
    }
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKeyFormat => Self::InvalidKeyFormat,
            CryptoError::Decryption => Self::DecryptionFailed,
            CryptoError::Encryption(_) => Self::DecryptionFailed,
            CryptoError::KeyDerivation(_)
            | CryptoError::InvalidInput(_)
            | CryptoError::PasswordHash(_) => Self::GenericCryptographyError,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::InvalidRequest,
            StorageError::Conflict(_) => Self::InvalidRequest,
        }
    }
}
