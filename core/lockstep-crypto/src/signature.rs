//! Multi-factor online signatures and device fingerprints.
//!
//! An online signature is one 8-digit decimal group per factor, joined with
//! dashes. Each group is `HMAC-SHA256(factor_key, data || ctr_data)`,
//! truncated to its last four bytes, reduced modulo 10^8. Factor keys are
//! derived from the activation ECDH secret by factor index.

use crate::kdf;
use crate::keys::SecretBytes;
use lockstep_types::{SignatureFactor, SignatureType};
use sha2::{Digest, Sha256};

/// Decimal digits per signature factor group.
pub const SIGNATURE_GROUP_DIGITS: usize = 8;

const DECIMAL_MODULUS: u64 = 100_000_000;

/// Derives the signature key of one factor from the activation ECDH secret.
#[must_use]
pub fn derive_factor_key(shared_secret: &[u8], factor: SignatureFactor) -> SecretBytes {
    kdf::kdf_internal(shared_secret, factor.key_index())
}

/// Computes the online signature for `data` at one counter position.
#[must_use]
pub fn compute_signature(
    shared_secret: &[u8],
    signature_type: SignatureType,
    data: &[u8],
    ctr_data: &[u8],
) -> String {
    let mut input = Vec::with_capacity(data.len() + ctr_data.len());
    input.extend_from_slice(data);
    input.extend_from_slice(ctr_data);

    signature_type
        .factors()
        .iter()
        .map(|&factor| {
            let key = derive_factor_key(shared_secret, factor);
            let mac = kdf::hmac_sha256(key.as_bytes(), &input);
            decimal_group(&mac)
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Constant-time comparison of two signature strings.
#[must_use]
pub fn signatures_equal(a: &str, b: &str) -> bool {
    kdf::constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Device public key fingerprint for protocol v2 activations.
#[must_use]
pub fn fingerprint_v2(device_public_key: &[u8]) -> String {
    let hash = Sha256::digest(device_public_key);
    decimal_group(&hash)
}

/// Device public key fingerprint for protocol v3 activations, binding the
/// server key and the activation identifier.
#[must_use]
pub fn fingerprint_v3(
    device_public_key: &[u8],
    server_public_key: &[u8],
    activation_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_public_key);
    hasher.update(server_public_key);
    hasher.update(activation_id.as_bytes());
    decimal_group(&hasher.finalize())
}

/// Last four bytes big-endian, reduced to 8 decimal digits.
fn decimal_group(hash: &[u8]) -> String {
    let tail = &hash[hash.len() - 4..];
    let value = u64::from(u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]));
    format!("{:08}", value % DECIMAL_MODULUS)
}
