//! Checksums and Ed25519 signatures over canonical JSON.
//!
//! A value is serialized to JSON with object keys sorted at every depth and
//! no insignificant whitespace, then hashed with SHA-256. The signature is
//! taken over that digest, so both sides only need to agree on the Rust type
//! being signed, not on how a particular serializer orders fields.
//!
//! Verification fails closed: every decoding problem is reported as an error
//! and callers treat any error as "untrusted".

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Errors raised while signing or verifying.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("cannot serialize value for checksum: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("a private key was supplied where a public verification key is required")]
    PrivateKeyPresented,

    #[error("signature is not valid base64-encoded Ed25519")]
    Malformed,

    #[error("signature does not match")]
    Mismatch,
}

/// Serialize `value` as canonical JSON: sorted keys, compact.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SignatureError> {
    let tree = sorted(serde_json::to_value(value)?);
    Ok(serde_json::to_vec(&tree)?)
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// SHA-256 of the canonical JSON form of `value`.
pub fn checksum<T: Serialize + ?Sized>(value: &T) -> Result<[u8; 32], SignatureError> {
    let bytes = canonical_json(value)?;
    Ok(Sha256::digest(&bytes).into())
}

/// Sign the checksum of `value`, returning the signature as base64.
pub fn sign<T: Serialize + ?Sized>(value: &T, key: &SigningKey) -> Result<String, SignatureError> {
    let digest = checksum(value)?;
    Ok(STANDARD.encode(key.sign(&digest).to_bytes()))
}

/// Verify a base64 signature over the checksum of `value`.
pub fn verify<T: Serialize + ?Sized>(
    value: &T,
    signature: &str,
    key: &VerifyingKey,
) -> Result<(), SignatureError> {
    let digest = checksum(value)?;
    let raw = STANDARD
        .decode(signature.trim())
        .map_err(|_| SignatureError::Malformed)?;
    let sig = Signature::from_slice(&raw).map_err(|_| SignatureError::Malformed)?;
    key.verify_strict(&digest, &sig)
        .map_err(|_| SignatureError::Mismatch)
}

/// Verify against a PEM-encoded public key.
pub fn verify_with_pem<T: Serialize + ?Sized>(
    value: &T,
    signature: &str,
    pem: &str,
) -> Result<(), SignatureError> {
    let key = verifying_key_from_pem(pem)?;
    verify(value, signature, &key)
}

// ── Keys ──────────────────────────────────────────────────────────────────────

/// Parse an SPKI PEM public key. Private key material is rejected outright.
pub fn verifying_key_from_pem(pem: &str) -> Result<VerifyingKey, SignatureError> {
    if pem.contains("PRIVATE KEY") {
        return Err(SignatureError::PrivateKeyPresented);
    }
    VerifyingKey::from_public_key_pem(pem.trim())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))
}

/// Parse a PKCS#8 PEM private key.
pub fn signing_key_from_pem(pem: &str) -> Result<SigningKey, SignatureError> {
    SigningKey::from_pkcs8_pem(pem.trim()).map_err(|e| SignatureError::InvalidKey(e.to_string()))
}

pub fn verifying_key_to_pem(key: &VerifyingKey) -> Result<String, SignatureError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))
}

pub fn signing_key_to_pem(key: &SigningKey) -> Result<String, SignatureError> {
    key.to_pkcs8_pem(LineEnding::LF)
        .map(|pem| pem.as_str().to_owned())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))
}

/// Fresh signing key from the OS RNG.
#[must_use]
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}
