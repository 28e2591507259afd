//! EC P-256 key handling: generation, encoding, ECDH and ECDSA.
//!
//! Public keys travel as 33-byte SEC1 compressed points; private keys as
//! 32-byte scalars. All exported secret material is wrapped in
//! [`SecretBytes`] so it is zeroized on drop.

use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an encoded (compressed) public key.
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Length of an encoded private key scalar.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Derivation index of the transport key.
const TRANSPORT_KEY_INDEX: u64 = 1000;

/// Derivation index of the vault encryption key.
const VAULT_KEY_INDEX: u64 = 2000;

/// Secret byte string that zeroizes itself on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Wraps an owned byte vector.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretBytes").field(&"[REDACTED]").finish()
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An EC P-256 key pair.
#[derive(Clone)]
pub struct EcKeyPair {
    private: SecretKey,
    public: PublicKey,
}

impl EcKeyPair {
    /// Generates a fresh random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let private = SecretKey::random(&mut rand::rngs::OsRng);
        let public = private.public_key();
        Self { private, public }
    }

    /// Reconstructs a key pair from an encoded private key.
    pub fn from_private_key_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let private = private_key_from_bytes(bytes)?;
        let public = private.public_key();
        Ok(Self { private, public })
    }

    /// The private half.
    #[must_use]
    pub fn private_key(&self) -> &SecretKey {
        &self.private
    }

    /// The public half.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Encoded private key scalar.
    #[must_use]
    pub fn private_key_bytes(&self) -> SecretBytes {
        private_key_to_bytes(&self.private)
    }

    /// Encoded compressed public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        public_key_to_bytes(&self.public)
    }
}

impl std::fmt::Debug for EcKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcKeyPair")
            .field("public", &self.public_key_bytes())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Decodes a SEC1-encoded public key (compressed or uncompressed).
pub fn public_key_from_bytes(bytes: &[u8]) -> CryptoResult<PublicKey> {
    PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidKeyFormat)
}

/// Encodes a public key as a 33-byte compressed SEC1 point.
#[must_use]
pub fn public_key_to_bytes(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(true).as_bytes().to_vec()
}

/// Decodes a 32-byte private key scalar.
pub fn private_key_from_bytes(bytes: &[u8]) -> CryptoResult<SecretKey> {
    SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidKeyFormat)
}

/// Encodes a private key as its 32-byte scalar.
#[must_use]
pub fn private_key_to_bytes(key: &SecretKey) -> SecretBytes {
    SecretBytes::new(key.to_bytes().to_vec())
}

/// Raw ECDH agreement: the x-coordinate of the shared point.
#[must_use]
pub fn shared_secret(private: &SecretKey, public: &PublicKey) -> SecretBytes {
    let shared = p256::ecdh::diffie_hellman(private.to_nonzero_scalar(), public.as_affine());
    SecretBytes::new(shared.raw_secret_bytes().to_vec())
}

/// Derives the long-lived transport key for an activation from the
/// server private key and the device public key.
#[must_use]
pub fn derive_transport_key(private: &SecretKey, public: &PublicKey) -> SecretBytes {
    let shared = shared_secret(private, public);
    kdf::kdf_internal(shared.as_bytes(), TRANSPORT_KEY_INDEX)
}

/// Derives the vault encryption key for an activation.
#[must_use]
pub fn derive_vault_key(private: &SecretKey, public: &PublicKey) -> SecretBytes {
    let shared = shared_secret(private, public);
    kdf::kdf_internal(shared.as_bytes(), VAULT_KEY_INDEX)
}

/// Wraps a key for transport under a 16-byte wrapping key
/// (AES-128-CBC, zero IV; the wrapped material is unique per activation).
pub fn wrap_key(key_to_wrap: &[u8], wrapping_key: &[u8]) -> CryptoResult<Vec<u8>> {
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
    let wk = wrapping_key_array(wrapping_key)?;
    let iv = [0u8; 16];
    Ok(cbc::Encryptor::<aes::Aes128>::new((&wk).into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(key_to_wrap))
}

/// Reverses [`wrap_key`].
pub fn unwrap_key(wrapped: &[u8], wrapping_key: &[u8]) -> CryptoResult<SecretBytes> {
    use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
    let wk = wrapping_key_array(wrapping_key)?;
    let iv = [0u8; 16];
    cbc::Decryptor::<aes::Aes128>::new((&wk).into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(wrapped)
        .map(SecretBytes::new)
        .map_err(|_| CryptoError::Decryption)
}

fn wrapping_key_array(wrapping_key: &[u8]) -> CryptoResult<[u8; 16]> {
    if wrapping_key.len() != 16 {
        return Err(CryptoError::InvalidInput(
            "wrapping key must be 16 bytes".to_string(),
        ));
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(wrapping_key);
    Ok(key)
}

/// Signs data with ECDSA over SHA-256, returning a DER-encoded signature.
#[must_use]
pub fn ecdsa_sign(private: &SecretKey, data: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from(private);
    let signature: Signature = signing_key.sign(data);
    signature.to_der().as_bytes().to_vec()
}

/// Verifies a DER-encoded ECDSA signature.
#[must_use]
pub fn ecdsa_verify(public: &PublicKey, data: &[u8], signature: &[u8]) -> bool {
    let verifying_key = VerifyingKey::from(public);
    match Signature::from_der(signature) {
        Ok(sig) => verifying_key.verify(data, &sig).is_ok(),
        Err(_) => false,
    }
}
