//! Status enums for activations, recovery codes and PUKs.

use serde::{Deserialize, Serialize};

/// Reason recorded when an activation is blocked without an explicit one.
pub const BLOCKED_REASON_NOT_SPECIFIED: &str = "NOT_SPECIFIED";

/// Reason recorded when the failed-attempt threshold blocks an activation.
pub const BLOCKED_REASON_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";

/// Lifecycle state of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationStatus {
    /// Server-side record exists, device has not paired yet.
    Created,
    /// Device submitted its public key; waiting for commit.
    OtpUsed,
    /// Fully activated and usable.
    Active,
    /// Temporarily blocked; can be unblocked back to active.
    Blocked,
    /// Terminal state.
    Removed,
}

impl ActivationStatus {
    /// Wire byte used in the encrypted status blob.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::OtpUsed => 2,
            Self::Active => 3,
            Self::Blocked => 4,
            Self::Removed => 5,
        }
    }

    /// True for states that still await completion and can expire.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Created | Self::OtpUsed)
    }
}

/// Lifecycle state of a recovery code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryCodeStatus {
    /// Issued together with an uncommitted activation.
    Created,
    /// Usable for recovery.
    Active,
    /// Too many failed PUK attempts.
    Blocked,
    /// Permanently retired.
    Revoked,
}

/// State of a single recovery PUK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryPukStatus {
    /// Next PUK eligible for verification.
    Valid,
    /// Consumed by a successful recovery.
    Used,
    /// Invalidated after the owning code was blocked.
    Invalid,
}

/// A single authentication factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFactor {
    Possession,
    Knowledge,
    Biometry,
}

impl SignatureFactor {
    /// Key derivation index of this factor.
    #[must_use]
    pub const fn key_index(self) -> u64 {
        match self {
            Self::Possession => 1,
            Self::Knowledge => 2,
            Self::Biometry => 3,
        }
    }
}

/// Combination of factors a signature was computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Possession,
    Knowledge,
    Biometry,
    PossessionKnowledge,
    PossessionBiometry,
    PossessionKnowledgeBiometry,
}

impl SignatureType {
    /// Individual factors, in signature order.
    #[must_use]
    pub fn factors(self) -> &'static [SignatureFactor] {
        use SignatureFactor::*;
        match self {
            Self::Possession => &[Possession],
            Self::Knowledge => &[Knowledge],
            Self::Biometry => &[Biometry],
            Self::PossessionKnowledge => &[Possession, Knowledge],
            Self::PossessionBiometry => &[Possession, Biometry],
            Self::PossessionKnowledgeBiometry => &[Possession, Knowledge, Biometry],
        }
    }

    /// True when the biometry factor participates.
    #[must_use]
    pub fn uses_biometry(self) -> bool {
        self.factors().contains(&SignatureFactor::Biometry)
    }
}
