//! At-rest protection of server private keys and recovery PUK hashes.
//!
//! Records are encrypted under a process-wide master secret loaded from
//! configuration. The per-record IV is derived from a context tuple (for
//! server keys: user id + activation id; for PUKs: application id, user id,
//! recovery code, PUK index), so a value copied onto another record fails to
//! decrypt. The stored value is tagged with its encryption mode so old
//! plaintext records stay readable after encryption is turned on.

use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use crate::keys::SecretBytes;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const ENC_KEY_INDEX: u64 = 1;
const MAC_KEY_INDEX: u64 = 2;
const TAG_LENGTH: usize = 16;

/// How a stored secret value is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncryptionMode {
    /// Plaintext storage (no master secret configured).
    NoEncryption,
    /// AES-128-CBC with a context-derived IV plus an HMAC tag.
    AesHmac,
}

/// A secret value as persisted, tagged with its protection mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub mode: EncryptionMode,
    pub data: Vec<u8>,
}

/// Codec encrypting and decrypting record-bound secrets.
pub struct KeyAtRestCodec {
    master: Option<MasterKeys>,
}

struct MasterKeys {
    secret: SecretBytes,
    enc_key: SecretBytes,
    mac_key: SecretBytes,
}

impl MasterKeys {
    fn enc_key_array(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key.copy_from_slice(self.enc_key.as_bytes());
        key
    }
}

impl KeyAtRestCodec {
    /// Creates a codec. With `None` (or an empty secret) new values are
    /// written unencrypted; existing encrypted values still require the
    /// secret and fail to decrypt.
    #[must_use]
    pub fn new(master_secret: Option<&[u8]>) -> Self {
        let master = master_secret.filter(|s| !s.is_empty()).map(|secret| MasterKeys {
            secret: SecretBytes::new(secret.to_vec()),
            enc_key: kdf::kdf_internal(secret, ENC_KEY_INDEX),
            mac_key: kdf::kdf_internal(secret, MAC_KEY_INDEX),
        });
        Self { master }
    }

    /// True when new values will be written encrypted.
    #[must_use]
    pub fn encrypts(&self) -> bool {
        self.master.is_some()
    }

    /// Protects a secret for storage, bound to `context`.
    #[must_use]
    pub fn encrypt(&self, context: &[u8], plaintext: &[u8]) -> EncryptedValue {
        match &self.master {
            None => EncryptedValue {
                mode: EncryptionMode::NoEncryption,
                data: plaintext.to_vec(),
            },
            Some(master) => {
                let key = master.enc_key_array();
                let iv = derive_record_iv(master.secret.as_bytes(), context);
                let ciphertext = Aes128CbcEnc::new((&key).into(), (&iv).into())
                    .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
                let tag = compute_tag(master.mac_key.as_bytes(), context, &ciphertext);

                let mut data = ciphertext;
                data.extend_from_slice(&tag);
                EncryptedValue {
                    mode: EncryptionMode::AesHmac,
                    data,
                }
            }
        }
    }

    /// Recovers a stored secret, honoring the stored mode. The same
    /// `context` used at encryption time is required.
    pub fn decrypt(&self, context: &[u8], value: &EncryptedValue) -> CryptoResult<SecretBytes> {
        match value.mode {
            EncryptionMode::NoEncryption => Ok(SecretBytes::new(value.data.clone())),
            EncryptionMode::AesHmac => {
                let master = self.master.as_ref().ok_or_else(|| {
                    CryptoError::KeyDerivation("no master secret configured".to_string())
                })?;
                if value.data.len() < TAG_LENGTH {
                    return Err(CryptoError::Decryption);
                }
                let (ciphertext, tag) = value.data.split_at(value.data.len() - TAG_LENGTH);
                let expected = compute_tag(master.mac_key.as_bytes(), context, ciphertext);
                if !kdf::constant_time_eq(&expected, tag) {
                    return Err(CryptoError::Decryption);
                }

                let key = master.enc_key_array();
                let iv = derive_record_iv(master.secret.as_bytes(), context);
                let plaintext = Aes128CbcDec::new((&key).into(), (&iv).into())
                    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(|_| CryptoError::Decryption)?;
                Ok(SecretBytes::new(plaintext))
            }
        }
    }
}

/// Builds the context byte string from its parts.
#[must_use]
pub fn record_context(parts: &[&str]) -> Vec<u8> {
    parts.join("&").into_bytes()
}

fn derive_record_iv(master_secret: &[u8], context: &[u8]) -> [u8; 16] {
    let mac = kdf::hmac_sha256(master_secret, context);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&mac[..16]);
    iv
}

fn compute_tag(mac_key: &[u8], context: &[u8], ciphertext: &[u8]) -> [u8; TAG_LENGTH] {
    let mut data = Vec::with_capacity(context.len() + ciphertext.len());
    data.extend_from_slice(context);
    data.extend_from_slice(ciphertext);
    let mac = kdf::hmac_sha256(mac_key, &data);
    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&mac[..TAG_LENGTH]);
    tag
}
