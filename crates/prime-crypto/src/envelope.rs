//! Per-replica Ed25519 signing of wire envelopes.
//!
//! Every protocol message (§6 of the design) is signed over its
//! canonical-encoded bytes minus the signature field itself. This wraps
//! `ed25519-dalek` directly; there is no certificate ceremony here, only the
//! bytes-in/bytes-out contract the rest of the workspace depends on.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// A replica's private signing key.
#[derive(Clone)]
pub struct ReplicaSigningKey(SigningKey);

impl ReplicaSigningKey {
    /// Generates a fresh random signing key (used at first boot, before a
    /// persisted key exists in the keys directory — §6 persisted-state rule).
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// Restores a signing key from 32 bytes of seed material read from the
    /// keys directory.
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// Deterministic per-replica keypair derivation, for tests and local
    /// multi-replica development clusters only.
    pub fn deterministic_for_tests(replica_id: u32) -> Self {
        let mut seed = [0u8; 32];
        seed[0..4].copy_from_slice(&replica_id.to_le_bytes());
        seed[4..12].copy_from_slice(b"primeitr");
        Self::from_bytes(&seed)
    }

    pub fn verifying_key(&self) -> ReplicaVerifyingKey {
        ReplicaVerifyingKey(self.0.verifying_key())
    }

    /// Zeroizes and returns the raw seed bytes, for persistence to the keys
    /// directory.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }

    pub fn sign(&self, body: &[u8]) -> EnvelopeSignature {
        EnvelopeSignature(self.0.sign(body).to_bytes())
    }
}

/// A replica's public verifying key, distributed to every other member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaVerifyingKey(VerifyingKey);

impl ReplicaVerifyingKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::MalformedKey("ed25519 verifying key"))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn verify(&self, body: &[u8], sig: &EnvelopeSignature) -> Result<()> {
        let signature = ed25519_dalek::Signature::from_bytes(&sig.0);
        self.0
            .verify(body, &signature)
            .map_err(|_| Error::SignatureInvalid)
    }
}

/// A raw Ed25519 signature over an envelope body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnvelopeSignature(#[serde(with = "serde_bytes_64")] [u8; 64]);

impl EnvelopeSignature {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

mod serde_bytes_64 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        bytes.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let v = Vec::<u8>::deserialize(d)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 signature bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let sk = ReplicaSigningKey::deterministic_for_tests(1);
        let vk = sk.verifying_key();
        let sig = sk.sign(b"pre-prepare");
        assert!(vk.verify(b"pre-prepare", &sig).is_ok());
    }

    #[test]
    fn tampered_body_fails_verification() {
        let sk = ReplicaSigningKey::deterministic_for_tests(1);
        let vk = sk.verifying_key();
        let sig = sk.sign(b"pre-prepare");
        assert!(vk.verify(b"pre-prepare-tampered", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let sk1 = ReplicaSigningKey::deterministic_for_tests(1);
        let sk2 = ReplicaSigningKey::deterministic_for_tests(2);
        let sig = sk1.sign(b"commit");
        assert!(sk2.verifying_key().verify(b"commit", &sig).is_err());
    }

    #[test]
    fn deterministic_keys_are_stable_across_calls() {
        let a = ReplicaSigningKey::deterministic_for_tests(3).verifying_key();
        let b = ReplicaSigningKey::deterministic_for_tests(3).verifying_key();
        assert_eq!(a, b);
    }
}
