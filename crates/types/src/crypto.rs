//! Ed25519 key material and payload signing.
//!
//! Signatures are always computed over the canonical JSON rendering of a
//! payload (see [`crate::canonical_json`]), never over an ad hoc byte layout,
//! so any two participants agree on what was signed.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::canonical_json;

/// Errors from key handling and payload signing.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Payload could not be serialized to canonical JSON.
    #[error("canonical serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key bytes did not form a valid Ed25519 key.
    #[error("invalid key material")]
    InvalidKey,
}

/// An Ed25519 signing key pair.
#[derive(Clone)]
pub struct KeyPair(ed25519_dalek::SigningKey);

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        KeyPair(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Derive a keypair from a fixed seed (for testing/simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// Sign raw message bytes.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message).to_bytes().to_vec())
    }

    /// Sign the canonical JSON form of a payload.
    pub fn sign_payload<T: Serialize>(&self, payload: &T) -> Result<Signature, CryptoError> {
        let canonical = canonical_json(payload)?;
        Ok(self.sign(canonical.as_bytes()))
    }

    /// The verifying half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }
}

/// An Ed25519 public key (32 bytes, base64 on the wire).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Verify a signature over raw message bytes.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        use ed25519_dalek::Verifier;
        let key = match ed25519_dalek::VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let bytes: [u8; 64] = match signature.0.as_slice().try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        key.verify(message, &ed25519_dalek::Signature::from_bytes(&bytes))
            .is_ok()
    }

    /// Verify a signature over the canonical JSON form of a payload.
    ///
    /// Serialization failure verifies as `false`; a payload that has no
    /// canonical form cannot have been signed.
    pub fn verify_payload<T: Serialize>(&self, payload: &T, signature: &Signature) -> bool {
        match canonical_json(payload) {
            Ok(canonical) => self.verify(canonical.as_bytes(), signature),
            Err(_) => false,
        }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Construct from raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        Ok(PublicKey(bytes))
    }
}

/// An Ed25519 signature (64 bytes, base64 on the wire).
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Signature as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Construct from raw signature bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Signature(bytes)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", &hex::encode(&self.0)[..16.min(self.0.len() * 2)])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Signature(bytes))
    }
}

/// Deterministic fingerprint of a payload: base64 of the SHA-256 of its
/// canonical JSON. Stable between dispatch and the eventually-arriving
/// response, which is what keys the pending-request table.
pub fn fingerprint<T: Serialize>(payload: &T) -> Result<String, CryptoError> {
    let canonical = canonical_json(payload)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(STANDARD.encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = KeyPair::generate();
        let payload = json!({ "subject": "publisher", "version": 1 });

        let signature = keypair.sign_payload(&payload).unwrap();
        assert!(keypair.public_key().verify_payload(&payload, &signature));
    }

    #[test]
    fn test_mutated_payload_fails_verification() {
        let keypair = KeyPair::generate();
        let payload = json!({ "subject": "publisher", "version": 1 });
        let signature = keypair.sign_payload(&payload).unwrap();

        let mutated = json!({ "subject": "publisher", "version": 2 });
        assert!(!keypair.public_key().verify_payload(&mutated, &signature));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let keypair = KeyPair::generate();
        let other = KeyPair::generate();
        let payload = json!({ "x": 1 });
        let signature = keypair.sign_payload(&payload).unwrap();

        assert!(!other.public_key().verify_payload(&payload, &signature));
    }

    #[test]
    fn test_keypair_from_seed_deterministic() {
        let seed = [42u8; 32];
        let a = KeyPair::from_seed(&seed);
        let b = KeyPair::from_seed(&seed);

        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.sign(b"msg").as_bytes(), b.sign(b"msg").as_bytes());
    }

    #[test]
    fn test_fingerprint_is_key_order_independent() {
        let a = fingerprint(&json!({ "a": 1, "b": 2 })).unwrap();
        let b = fingerprint(&json!({ "b": 2, "a": 1 })).unwrap();
        assert_eq!(a, b);

        let c = fingerprint(&json!({ "a": 1, "b": 3 })).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_public_key_serde_roundtrip() {
        let key = KeyPair::generate().public_key();
        let json = serde_json::to_string(&key).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, back);
    }
}
