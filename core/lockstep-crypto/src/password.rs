//! Recovery PUK hashing.
//!
//! PUKs are short numeric secrets, so they are stored as Argon2id hashes in
//! PHC string format and verified through the password-hash API (which
//! compares in constant time).

use crate::error::{CryptoError, CryptoResult};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Hashes a PUK, producing a PHC-format string.
pub fn hash_puk(puk: &[u8]) -> CryptoResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(puk, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

/// Verifies a candidate PUK against a stored PHC hash string.
pub fn verify_puk(puk: &[u8], hash: &str) -> CryptoResult<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| CryptoError::PasswordHash(e.to_string()))?;
    match Argon2::default().verify_password(puk, &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::PasswordHash(e.to_string())),
    }
}

/// Generates a random numeric PUK of the given number of digits.
#[must_use]
pub fn generate_puk(digits: usize) -> String {
    use rand::Rng;
    let mut rng = rand::rngs::OsRng;
    (0..digits)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}
