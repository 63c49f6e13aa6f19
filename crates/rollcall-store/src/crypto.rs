//! Embedding encryption at rest.
//!
//! Biometric reference vectors are the only sensitive data the store holds.
//! They are sealed with AES-256-GCM before hitting disk: a fresh random
//! nonce per write, blob layout `nonce || ciphertext`. The key is derived
//! from a deployment passphrase with SHA-256. Attendance rows carry no
//! biometric data, so erasure only ever touches enrollment blobs.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rollcall_core::Embedding;
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("embedding blob too short to contain a nonce")]
    Truncated,
    #[error("embedding decryption failed (wrong key or tampered blob)")]
    Decrypt,
    #[error("embedding encryption failed")]
    Encrypt,
    #[error("decrypted embedding is not a whole number of f32 values")]
    Misaligned,
}

/// Seals and opens embedding blobs with a deployment-wide key.
#[derive(Clone)]
pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
}

impl EmbeddingCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    pub fn seal(&self, embedding: &Embedding) -> Result<Vec<u8>, CryptoError> {
        let mut plaintext = Vec::with_capacity(embedding.dim() * 4);
        for v in embedding.values() {
            plaintext.extend_from_slice(&v.to_le_bytes());
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    pub fn open(&self, blob: &[u8]) -> Result<Embedding, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        if plaintext.len() % 4 != 0 {
            return Err(CryptoError::Misaligned);
        }
        let values = plaintext
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Embedding::new(values))
    }
}
