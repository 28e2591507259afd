//! Core identifier and status types shared across the Lockstep server.
//!
//! Everything here is plain data: typed identifiers, the checksummed
//! activation/recovery code format, and the status enums that drive the
//! activation lifecycle. No crypto and no I/O.

mod code;
mod ids;
mod status;

pub use code::{generate_code, validate_code, CODE_BYTES, CODE_LENGTH};
pub use ids::{ActivationId, ApplicationId, TokenId};
pub use status::{
    ActivationStatus, RecoveryCodeStatus, RecoveryPukStatus, SignatureFactor, SignatureType,
    BLOCKED_REASON_MAX_FAILED_ATTEMPTS, BLOCKED_REASON_NOT_SPECIFIED,
};
