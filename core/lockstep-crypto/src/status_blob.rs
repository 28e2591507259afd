//! Encrypted activation status blob.
//!
//! The device polls its activation status and receives this 32-byte
//! AES-128-CBC blob, encrypted under the activation transport key. Plaintext
//! layout (23 bytes, PKCS#7-padded to two blocks):
//!
//! ```text
//! byte 0      status code (1..=5)
//! byte 1      current protocol version
//! byte 2      upgrade protocol version
//! byte 3      failed attempts
//! byte 4      max failed attempts
//! byte 5      counter look-ahead window
//! byte 6      counter low byte
//! bytes 7..23 keyed counter hash (16 bytes), zero for v2 activations
//! ```
//!
//! Protocol V3.1 clients send a 16-byte challenge; the server answers with a
//! fresh nonce and derives the IV from `challenge || nonce`. Older clients
//! get the fixed zero-IV form.

use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use lockstep_types::ActivationStatus;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Plaintext length before padding.
pub const STATUS_BLOB_PLAINTEXT_LENGTH: usize = 23;

/// Encrypted blob length on the wire.
pub const STATUS_BLOB_LENGTH: usize = 32;

/// Decoded contents of the status blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlob {
    pub status: ActivationStatus,
    pub current_version: u8,
    pub upgrade_version: u8,
    pub failed_attempts: u8,
    pub max_failed_attempts: u8,
    pub ctr_lookahead: u8,
    pub ctr_info: u8,
    pub ctr_data_hash: [u8; 16],
}

impl StatusBlob {
    fn to_bytes(&self) -> [u8; STATUS_BLOB_PLAINTEXT_LENGTH] {
        let mut out = [0u8; STATUS_BLOB_PLAINTEXT_LENGTH];
        out[0] = self.status.as_byte();
        out[1] = self.current_version;
        out[2] = self.upgrade_version;
        out[3] = self.failed_attempts;
        out[4] = self.max_failed_attempts;
        out[5] = self.ctr_lookahead;
        out[6] = self.ctr_info;
        out[7..].copy_from_slice(&self.ctr_data_hash);
        out
    }

    fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != STATUS_BLOB_PLAINTEXT_LENGTH {
            return Err(CryptoError::Decryption);
        }
        let status = match bytes[0] {
            1 => ActivationStatus::Created,
            2 => ActivationStatus::OtpUsed,
            3 => ActivationStatus::Active,
            4 => ActivationStatus::Blocked,
            5 => ActivationStatus::Removed,
            _ => return Err(CryptoError::Decryption),
        };
        let mut ctr_data_hash = [0u8; 16];
        ctr_data_hash.copy_from_slice(&bytes[7..]);
        Ok(Self {
            status,
            current_version: bytes[1],
            upgrade_version: bytes[2],
            failed_attempts: bytes[3],
            max_failed_attempts: bytes[4],
            ctr_lookahead: bytes[5],
            ctr_info: bytes[6],
            ctr_data_hash,
        })
    }
}

/// Encrypts a status blob under the transport key.
///
/// `challenge` and `nonce` must either both be present (V3.1) or both
/// absent (zero-IV form).
pub fn encrypt_status_blob(
    blob: &StatusBlob,
    transport_key: &[u8],
    challenge: Option<&[u8]>,
    nonce: Option<&[u8]>,
) -> CryptoResult<Vec<u8>> {
    let key = transport_key_array(transport_key)?;
    let iv = blob_iv(transport_key, challenge, nonce)?;
    let ciphertext = Aes128CbcEnc::new((&key).into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(&blob.to_bytes());
    debug_assert_eq!(ciphertext.len(), STATUS_BLOB_LENGTH);
    Ok(ciphertext)
}

/// Decrypts and decodes a status blob. Counterpart of
/// [`encrypt_status_blob`], used by device-side code and tests.
pub fn decrypt_status_blob(
    data: &[u8],
    transport_key: &[u8],
    challenge: Option<&[u8]>,
    nonce: Option<&[u8]>,
) -> CryptoResult<StatusBlob> {
    if data.len() != STATUS_BLOB_LENGTH {
        return Err(CryptoError::Decryption);
    }
    let key = transport_key_array(transport_key)?;
    let iv = blob_iv(transport_key, challenge, nonce)?;
    let plaintext = Aes128CbcDec::new((&key).into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| CryptoError::Decryption)?;
    StatusBlob::from_bytes(&plaintext)
}

fn transport_key_array(transport_key: &[u8]) -> CryptoResult<[u8; 16]> {
    if transport_key.len() != 16 {
        return Err(CryptoError::InvalidInput(
            "transport key must be 16 bytes".to_string(),
        ));
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(transport_key);
    Ok(key)
}

fn blob_iv(
    transport_key: &[u8],
    challenge: Option<&[u8]>,
    nonce: Option<&[u8]>,
) -> CryptoResult<[u8; 16]> {
    match (challenge, nonce) {
        (None, None) => Ok([0u8; 16]),
        (Some(challenge), Some(nonce)) => {
            let mut data = Vec::with_capacity(challenge.len() + nonce.len());
            data.extend_from_slice(challenge);
            data.extend_from_slice(nonce);
            let mac = kdf::hmac_sha256(transport_key, &data);
            let mut iv = [0u8; 16];
            iv.copy_from_slice(&mac[..16]);
            Ok(iv)
        }
        _ => Err(CryptoError::InvalidInput(
            "challenge and nonce must be used together".to_string(),
        )),
    }
}
