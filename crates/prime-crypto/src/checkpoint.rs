//! Per-checkpoint payload encryption (§4.8).
//!
//! Each checkpoint is encrypted with a fresh IV+key pair before being
//! broadcast; replicas compare ciphertext bytes (not plaintext) to decide
//! `correct`/`stable`, so encryption must be deterministic given the same
//! key+IV+plaintext — which AES-256-GCM is.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce as AesNonce};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{Error, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointKey([u8; KEY_LEN]);

impl CheckpointKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CheckpointIv([u8; NONCE_LEN]);

impl CheckpointIv {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> [u8; NONCE_LEN] {
        self.0
    }
}

/// Encrypts `plaintext` (the application snapshot) under `key`/`iv`.
pub fn encrypt(key: CheckpointKey, iv: CheckpointIv, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .encrypt(AesNonce::from_slice(&iv.0), plaintext)
        .map_err(|_| Error::DecryptionFailed)
}

/// Decrypts a checkpoint payload; fails closed on any tampering.
pub fn decrypt(key: CheckpointKey, iv: CheckpointIv, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .decrypt(AesNonce::from_slice(&iv.0), ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = CheckpointKey::generate();
        let iv = CheckpointIv::generate();
        let plaintext = b"substation state snapshot";
        let ciphertext = encrypt(key, iv, plaintext).unwrap();
        assert_eq!(decrypt(key, iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let key = CheckpointKey::generate();
        let wrong_key = CheckpointKey::generate();
        let iv = CheckpointIv::generate();
        let ciphertext = encrypt(key, iv, b"snapshot").unwrap();
        assert!(decrypt(wrong_key, iv, &ciphertext).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        let key = CheckpointKey::generate();
        let iv = CheckpointIv::generate();
        let mut ciphertext = encrypt(key, iv, b"snapshot").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert!(decrypt(key, iv, &ciphertext).is_err());
    }
}
