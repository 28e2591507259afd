//! Scope-parameterized ECIES envelope encryption.
//!
//! Each request/response pair is protected by an envelope key derived from
//! an ephemeral ECDH agreement against a static server-side key:
//!
//! ```text
//! Z  = ECDH(static_private, ephemeral_public)
//! K  = KDF-X9.63(Z, sharedInfo1, 48)   ->  k_enc(16) | k_mac(16) | iv_base(16)
//! ```
//!
//! Requests are AES-128-CBC encrypted under `k_enc` and authenticated with
//! `HMAC-SHA256(k_mac, ciphertext || sharedInfo2)`. Protocol V3.0 uses
//! `iv_base` directly as the CBC IV; V3.1 requests carry a 16-byte nonce and
//! use `HMAC(iv_base, nonce)[..16]`. Responses reuse the request envelope
//! key and IV and carry no ephemeral key.
//!
//! `sharedInfo1` selects the operation scope; `sharedInfo2` binds the
//! application secret (and, for activation scope, the transport key).

use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use crate::keys::{self, SecretBytes};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use p256::{PublicKey, SecretKey};
use rand::RngCore;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Envelope key length: `k_enc` + `k_mac` + `iv_base`.
pub const ENVELOPE_KEY_LENGTH: usize = 48;

/// Nonce length for protocol V3.1 requests.
pub const NONCE_LENGTH: usize = 16;

/// `sharedInfo1` for generic application-scope encryption.
pub const SH1_APPLICATION_GENERIC: &[u8] = b"/pa/generic/application";

/// `sharedInfo1` for generic activation-scope encryption.
pub const SH1_ACTIVATION_GENERIC: &[u8] = b"/pa/generic/activation";

/// `sharedInfo1` for the layer-2 activation payload.
pub const SH1_ACTIVATION_LAYER_2: &[u8] = b"/pa/activation";

/// `sharedInfo1` for token creation.
pub const SH1_CREATE_TOKEN: &[u8] = b"/pa/token/create";

/// `sharedInfo1` for vault unlock.
pub const SH1_VAULT_UNLOCK: &[u8] = b"/pa/vault/unlock";

/// `sharedInfo1` for the protocol upgrade handshake.
pub const SH1_UPGRADE: &[u8] = b"/pa/upgrade";

/// `sharedInfo2` for application scope: `HMAC-SHA256(app_secret, app_secret)`.
#[must_use]
pub fn shared_info2_application(app_secret: &[u8]) -> [u8; 32] {
    kdf::hmac_sha256(app_secret, app_secret)
}

/// `sharedInfo2` for activation scope:
/// `HMAC-SHA256(app_secret, transport_key)`, with a zero key before the
/// transport key exists.
#[must_use]
pub fn shared_info2_activation(app_secret: &[u8], transport_key: Option<&[u8]>) -> [u8; 32] {
    const ZERO_KEY: [u8; 16] = [0u8; 16];
    kdf::hmac_sha256(app_secret, transport_key.unwrap_or(&ZERO_KEY))
}

/// One ECIES message on the wire.
///
/// Requests carry the ephemeral public key (33-byte compressed point) and,
/// from protocol V3.1 on, a 16-byte nonce. Responses carry neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EciesCryptogram {
    pub ephemeral_public_key: Option<Vec<u8>>,
    pub mac: Vec<u8>,
    pub encrypted_data: Vec<u8>,
    pub nonce: Option<Vec<u8>>,
}

/// The derived envelope key of one request/response exchange.
#[derive(Clone)]
pub struct EnvelopeKey {
    secret: SecretBytes,
}

impl EnvelopeKey {
    /// Derives the envelope key from an ECDH result and `sharedInfo1`.
    #[must_use]
    pub fn derive(shared_secret: &[u8], shared_info1: &[u8]) -> Self {
        Self {
            secret: kdf::kdf_x963(shared_secret, shared_info1, ENVELOPE_KEY_LENGTH),
        }
    }

    /// Reconstructs an envelope key from its raw 48 bytes.
    ///
    /// Used by a mediating party that received the key through
    /// the decryptor-parameters export.
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != ENVELOPE_KEY_LENGTH {
            return Err(CryptoError::InvalidInput(format!(
                "envelope key must be {ENVELOPE_KEY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            secret: SecretBytes::new(bytes.to_vec()),
        })
    }

    /// The raw envelope key, for the mediator export.
    #[must_use]
    pub fn secret_bytes(&self) -> &SecretBytes {
        &self.secret
    }

    fn k_enc(&self) -> [u8; 16] {
        let mut k = [0u8; 16];
        k.copy_from_slice(&self.secret.as_bytes()[..16]);
        k
    }

    fn k_mac(&self) -> &[u8] {
        &self.secret.as_bytes()[16..32]
    }

    fn iv_base(&self) -> &[u8] {
        &self.secret.as_bytes()[32..48]
    }

    /// CBC IV for a message: `iv_base` (V3.0) or derived from the nonce (V3.1).
    #[must_use]
    pub fn iv(&self, nonce: Option<&[u8]>) -> [u8; 16] {
        match nonce {
            Some(nonce) => kdf::derive_iv(self.iv_base(), nonce),
            None => {
                let mut iv = [0u8; 16];
                iv.copy_from_slice(self.iv_base());
                iv
            }
        }
    }

    fn compute_mac(&self, encrypted_data: &[u8], shared_info2: &[u8]) -> [u8; 32] {
        let mut data = Vec::with_capacity(encrypted_data.len() + shared_info2.len());
        data.extend_from_slice(encrypted_data);
        data.extend_from_slice(shared_info2);
        kdf::hmac_sha256(self.k_mac(), &data)
    }

    fn encrypt(&self, plaintext: &[u8], nonce: Option<&[u8]>) -> Vec<u8> {
        let key = self.k_enc();
        let iv = self.iv(nonce);
        Aes128CbcEnc::new((&key).into(), (&iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    fn decrypt(&self, ciphertext: &[u8], nonce: Option<&[u8]>) -> CryptoResult<Vec<u8>> {
        let key = self.k_enc();
        let iv = self.iv(nonce);
        Aes128CbcDec::new((&key).into(), (&iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }
}

impl std::fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeKey").finish_non_exhaustive()
    }
}

/// Server-side ECIES processor for one scope.
///
/// Holds the static private key and the scope parameters; after the envelope
/// key is established by [`decrypt_request`](Self::decrypt_request) or
/// [`init_envelope_key`](Self::init_envelope_key), the same instance
/// encrypts the response under the same key.
pub struct EciesDecryptor {
    private_key: SecretKey,
    shared_info1: Vec<u8>,
    shared_info2: [u8; 32],
    envelope: Option<EnvelopeKey>,
    request_nonce: Option<Vec<u8>>,
}

impl EciesDecryptor {
    /// Creates a decryptor for the given static key and scope.
    #[must_use]
    pub fn new(private_key: SecretKey, shared_info1: &[u8], shared_info2: [u8; 32]) -> Self {
        Self {
            private_key,
            shared_info1: shared_info1.to_vec(),
            shared_info2,
            envelope: None,
            request_nonce: None,
        }
    }

    /// Derives the envelope key from an ephemeral public key without
    /// decrypting anything. Used by the mediator export.
    pub fn init_envelope_key(&mut self, ephemeral_public_key: &[u8]) -> CryptoResult<()> {
        let ephemeral = keys::public_key_from_bytes(ephemeral_public_key)?;
        let shared = keys::shared_secret(&self.private_key, &ephemeral);
        self.envelope = Some(EnvelopeKey::derive(shared.as_bytes(), &self.shared_info1));
        Ok(())
    }

    /// The established envelope key, if any.
    #[must_use]
    pub fn envelope_key(&self) -> Option<&EnvelopeKey> {
        self.envelope.as_ref()
    }

    /// The `sharedInfo2` parameter of this scope.
    #[must_use]
    pub fn shared_info2(&self) -> &[u8; 32] {
        &self.shared_info2
    }

    /// Verifies and decrypts a request cryptogram.
    ///
    /// The envelope key is retained so the response can be encrypted with
    /// [`encrypt_response`](Self::encrypt_response).
    pub fn decrypt_request(&mut self, cryptogram: &EciesCryptogram) -> CryptoResult<Vec<u8>> {
        let ephemeral = cryptogram
            .ephemeral_public_key
            .as_deref()
            .ok_or(CryptoError::Decryption)?;
        self.init_envelope_key(ephemeral)?;
        let envelope = self.envelope.clone().ok_or(CryptoError::Decryption)?;

        let expected_mac = envelope.compute_mac(&cryptogram.encrypted_data, &self.shared_info2);
        if !kdf::constant_time_eq(&expected_mac, &cryptogram.mac) {
            self.envelope = None;
            return Err(CryptoError::Decryption);
        }

        let nonce = cryptogram.nonce.as_deref();
        let plaintext = envelope.decrypt(&cryptogram.encrypted_data, nonce)?;
        self.request_nonce = cryptogram.nonce.clone();
        Ok(plaintext)
    }

    /// Encrypts a response under the envelope key established by the request.
    pub fn encrypt_response(&self, plaintext: &[u8]) -> CryptoResult<EciesCryptogram> {
        let envelope = self.envelope.as_ref().ok_or_else(|| {
            CryptoError::Encryption("no envelope key established".to_string())
        })?;
        let encrypted_data = envelope.encrypt(plaintext, self.request_nonce.as_deref());
        let mac = envelope.compute_mac(&encrypted_data, &self.shared_info2);
        Ok(EciesCryptogram {
            ephemeral_public_key: None,
            mac: mac.to_vec(),
            encrypted_data,
            nonce: None,
        })
    }
}

/// Client-side ECIES processor, the counterpart of [`EciesDecryptor`].
///
/// Lives here for the mediator export path and for tests that need to build
/// well-formed request cryptograms.
pub struct EciesEncryptor {
    public_key: PublicKey,
    shared_info1: Vec<u8>,
    shared_info2: [u8; 32],
    envelope: Option<EnvelopeKey>,
    request_nonce: Option<Vec<u8>>,
}

impl EciesEncryptor {
    /// Creates an encryptor against the given static public key and scope.
    #[must_use]
    pub fn new(public_key: PublicKey, shared_info1: &[u8], shared_info2: [u8; 32]) -> Self {
        Self {
            public_key,
            shared_info1: shared_info1.to_vec(),
            shared_info2,
            envelope: None,
            request_nonce: None,
        }
    }

    /// Encrypts a request, generating a fresh ephemeral key pair and, when
    /// `with_nonce` is set (protocol V3.1), a random nonce.
    pub fn encrypt_request(
        &mut self,
        plaintext: &[u8],
        with_nonce: bool,
    ) -> CryptoResult<EciesCryptogram> {
        let ephemeral = keys::EcKeyPair::generate();
        let shared = keys::shared_secret(ephemeral.private_key(), &self.public_key);
        let envelope = EnvelopeKey::derive(shared.as_bytes(), &self.shared_info1);

        let nonce = if with_nonce {
            let mut nonce = vec![0u8; NONCE_LENGTH];
            rand::rngs::OsRng.fill_bytes(&mut nonce);
            Some(nonce)
        } else {
            None
        };

        let encrypted_data = envelope.encrypt(plaintext, nonce.as_deref());
        let mac = envelope.compute_mac(&encrypted_data, &self.shared_info2);

        self.envelope = Some(envelope);
        self.request_nonce = nonce.clone();

        Ok(EciesCryptogram {
            ephemeral_public_key: Some(ephemeral.public_key_bytes()),
            mac: mac.to_vec(),
            encrypted_data,
            nonce,
        })
    }

    /// Verifies and decrypts a response to a previously encrypted request.
    pub fn decrypt_response(&self, cryptogram: &EciesCryptogram) -> CryptoResult<Vec<u8>> {
        let envelope = self.envelope.as_ref().ok_or(CryptoError::Decryption)?;
        let expected_mac = envelope.compute_mac(&cryptogram.encrypted_data, &self.shared_info2);
        if !kdf::constant_time_eq(&expected_mac, &cryptogram.mac) {
            return Err(CryptoError::Decryption);
        }
        envelope.decrypt(&cryptogram.encrypted_data, self.request_nonce.as_deref())
    }
}
