//! AES-256-GCM sealing.
//!
//! Sealed bytes are `nonce (12 bytes) || ciphertext`, usually carried as
//! base64 text.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("invalid sealing key: {0}")]
    InvalidKey(String),

    #[error("sealed payload is too short")]
    TooShort,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: wrong key or tampered payload")]
    Decrypt,

    #[error("sealed payload is not valid base64")]
    Encoding,

    #[error("sealed payload has an unexpected format: {0}")]
    Format(#[from] serde_json::Error),
}

/// A 256-bit symmetric key. `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SealKey([u8; KEY_LEN]);

impl SealKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut k = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut k);
        Self(k)
    }

    pub fn from_hex(text: &str) -> Result<Self, SealError> {
        let raw = hex::decode(text.trim()).map_err(|e| SealError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|v: Vec<u8>| {
            SealError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SealKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealKey(..)")
    }
}

/// Encrypt `plaintext`. Output: nonce || ciphertext.
pub fn seal(key: &SealKey, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let cipher =
        Aes256Gcm::new_from_slice(&key.0).map_err(|e| SealError::InvalidKey(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| SealError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`seal`].
pub fn open(key: &SealKey, blob: &[u8]) -> Result<Vec<u8>, SealError> {
    if blob.len() <= NONCE_LEN {
        return Err(SealError::TooShort);
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher =
        Aes256Gcm::new_from_slice(&key.0).map_err(|e| SealError::InvalidKey(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SealError::Decrypt)
}

pub fn seal_b64(key: &SealKey, plaintext: &[u8]) -> Result<String, SealError> {
    Ok(STANDARD.encode(seal(key, plaintext)?))
}

pub fn open_b64(key: &SealKey, text: &str) -> Result<Vec<u8>, SealError> {
    let blob = STANDARD
        .decode(text.trim())
        .map_err(|_| SealError::Encoding)?;
    open(key, &blob)
}
