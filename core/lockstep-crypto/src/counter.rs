//! Hash-based signature counter (protocol v3).
//!
//! The counter state is 16 bytes; each advance is
//! `HMAC-SHA256(ctr_data, 0x00)` truncated to 16 bytes. The server keeps the
//! latest value and searches a bounded look-ahead window during signature
//! verification.

use crate::kdf;
use rand::RngCore;

/// Length of the counter state.
pub const CTR_DATA_LENGTH: usize = 16;

/// Generates a fresh random counter state.
#[must_use]
pub fn init_counter() -> [u8; CTR_DATA_LENGTH] {
    let mut ctr = [0u8; CTR_DATA_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut ctr);
    ctr
}

/// Advances the counter by one step.
#[must_use]
pub fn next_counter(ctr_data: &[u8]) -> [u8; CTR_DATA_LENGTH] {
    let mac = kdf::hmac_sha256(ctr_data, &[0u8]);
    let mut next = [0u8; CTR_DATA_LENGTH];
    next.copy_from_slice(&mac[..CTR_DATA_LENGTH]);
    next
}

/// Keyed hash of the counter state, as embedded in the status blob.
#[must_use]
pub fn counter_hash(transport_key: &[u8], ctr_data: &[u8]) -> [u8; CTR_DATA_LENGTH] {
    let mac = kdf::hmac_sha256(transport_key, ctr_data);
    let mut hash = [0u8; CTR_DATA_LENGTH];
    hash.copy_from_slice(&mac[..CTR_DATA_LENGTH]);
    hash
}
