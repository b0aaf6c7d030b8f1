//! Per-stream key schedule (spec.md §4.B).
//!
//! Binds the derived AEAD key to both the pre-shared key and the stream id,
//! so a replayed record can never be valid encrypted under a different
//! stream's key even if it reuses an IV.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Fixes the protocol version: any change to the derivation requires a new
/// label, per spec.md §6.
const HKDF_SALT: &[u8] = b"aether-realist-v3";
const OKM_LEN: usize = 16;

/// A derived per-stream AES-128-GCM key. Zeroised on drop; owned exclusively
/// by the stream it was derived for (spec.md §3 ownership rules).
#[derive(ZeroizeOnDrop)]
pub struct StreamKey([u8; OKM_LEN]);

impl StreamKey {
    pub fn derive(psk: &[u8], stream_id: u64) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), psk);
        let info = stream_id.to_string();
        let mut okm = [0u8; OKM_LEN];
        hkdf.expand(info.as_bytes(), &mut okm)
            .map_err(|_| CryptoError::InvalidOkmLength)?;
        Ok(Self(okm))
    }

    fn cipher(&self) -> Aes128Gcm {
        Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.0))
    }

    /// Decrypts `ciphertext` with `nonce` (the record's 12-byte IV) and
    /// `aad` (the record's 28-byte header), per spec.md §4.B.
    pub fn decrypt(&self, nonce: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload { msg: ciphertext, aad },
            )
            .map_err(|_| CryptoError::AeadAuthFailed)
    }

    /// Encrypts `plaintext` under `nonce` with `header` as associated data,
    /// returning ciphertext with the authentication tag appended. Used for
    /// every outbound record that carries AEAD plaintext (spec.md §4.A) —
    /// the downlink `DATA` direction of the pump.
    pub fn encrypt_with_header(
        &self,
        nonce: &[u8; 12],
        header: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.cipher()
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: header,
                },
            )
            .map_err(|_| CryptoError::AeadAuthFailed)
    }
}
