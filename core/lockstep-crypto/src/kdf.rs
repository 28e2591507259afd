//! Key derivation functions.
//!
//! Two derivation schemes are in play:
//! - [`kdf_x963`], the ANSI X9.63 counter-mode KDF over SHA-256, used to
//!   expand an ECDH result into an ECIES envelope key;
//! - [`kdf_internal`], an HMAC-based index derivation used for the
//!   transport key, vault key and per-factor signature keys.

use crate::keys::SecretBytes;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// ANSI X9.63 KDF with SHA-256.
///
/// Produces `length` bytes from the shared secret and the scheme-specific
/// `shared_info` string.
#[must_use]
pub fn kdf_x963(secret: &[u8], shared_info: &[u8], length: usize) -> SecretBytes {
    let mut out = Vec::with_capacity(length + Sha256::output_size());
    let mut counter: u32 = 1;
    while out.len() < length {
        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.update(counter.to_be_bytes());
        hasher.update(shared_info);
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(length);
    SecretBytes::new(out)
}

/// Index-based internal KDF: `HMAC-SHA256(key, index_be)` truncated to 16 bytes.
#[must_use]
pub fn kdf_internal(key: &[u8], index: u64) -> SecretBytes {
    let mac = hmac_sha256(key, &index.to_be_bytes());
    SecretBytes::new(mac[..16].to_vec())
}

/// Plain HMAC-SHA256.
#[must_use]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Derives a 16-byte IV from an IV base and a request nonce (protocol V3.1).
#[must_use]
pub fn derive_iv(iv_base: &[u8], nonce: &[u8]) -> [u8; 16] {
    let mac = hmac_sha256(iv_base, nonce);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&mac[..16]);
    iv
}

/// Constant-time equality for MACs, digests and signatures.
///
/// Length mismatch returns `false` immediately; lengths are public here.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
