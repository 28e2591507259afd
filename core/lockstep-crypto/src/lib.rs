//! Cryptographic engine for the Lockstep server.
//!
//! Provides the primitives the service layer builds on:
//! - EC P-256 key pairs, ECDH and ECDSA ([`keys`])
//! - X9.63 and internal key derivation ([`kdf`])
//! - the scope-parameterized ECIES envelope scheme ([`ecies`])
//! - the hash-based signature counter ([`counter`])
//! - at-rest protection of server private keys and PUK hashes ([`at_rest`])
//! - PUK password hashing ([`password`])
//! - the encrypted activation status blob ([`status_blob`])
//! - multi-factor online signatures and device fingerprints ([`signature`])
//!
//! All byte-level constructions here are part of the device wire contract;
//! changing any of them breaks already-paired devices.

pub mod at_rest;
pub mod counter;
pub mod ecies;
mod error;
pub mod kdf;
pub mod keys;
pub mod password;
pub mod signature;
pub mod status_blob;

pub use error::{CryptoError, CryptoResult};
pub use keys::{EcKeyPair, SecretBytes};

// Re-exported so dependents name EC key types without pinning the curve
// crate themselves.
pub use p256;
