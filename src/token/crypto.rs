//! Symmetric encryption for link payload blobs using AES-256-GCM
//!
//! The key is derived from the link owner's stored password, so rotating or
//! removing the credential invalidates every encrypted link it issued.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, bail};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};

/// AES-256-GCM nonce size (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

fn cipher_for(password: &str) -> Aes256Gcm {
    let key_bytes: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes))
}

/// Encrypt a blob under a password-derived key.
///
/// Returns base64(nonce + ciphertext); a random nonce is prepended so the
/// same plaintext never encrypts to the same output twice.
pub fn encrypt(password: &str, plaintext: &str) -> anyhow::Result<String> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher_for(password)
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(combined))
}

/// Decrypt a blob produced by [`encrypt`] with the same password
pub fn decrypt(password: &str, encoded: &str) -> anyhow::Result<String> {
    let combined = BASE64.decode(encoded)?;
    if combined.len() < NONCE_SIZE {
        bail!("encrypted payload too short");
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher_for(password)
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("decryption failed: {e}"))?;

    Ok(String::from_utf8(plaintext)?)
}
