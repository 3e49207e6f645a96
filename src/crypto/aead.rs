//! ChaCha20-Poly1305 AEAD for the session frame stream.
//!
//! Every frame payload is sealed under the session key with additional
//! data reconstructed from the frame header, so a header cannot be swapped
//! between frames without failing authentication.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError, SESSION_KEY_SIZE};

/// A session key for AEAD operations.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Create a new session key from bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Encrypt plaintext under the session key.
///
/// # Arguments
/// * `key` - 32-byte session key
/// * `nonce` - 12-byte nonce, unique per encryption under this key
/// * `plaintext` - Data to encrypt
/// * `ad` - Additional authenticated data bound into the tag
///
/// # Returns
/// Ciphertext with appended 16-byte Poly1305 tag
pub fn aead_seal(
    key: &SessionKey,
    nonce: &[u8],
    plaintext: &[u8],
    ad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_nonce(nonce)?;

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad: ad })
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt ciphertext under the session key.
///
/// Fails with [`CryptoError::DecryptionFailed`] on any authentication
/// failure, without distinguishing the cause.
pub fn aead_open(
    key: &SessionKey,
    nonce: &[u8],
    ciphertext: &[u8],
    ad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_nonce(nonce)?;

    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: ad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Compare two byte strings in constant time.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

fn check_nonce(nonce: &[u8]) -> Result<(), CryptoError> {
    if nonce.len() != AEAD_NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: AEAD_NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    Ok(())
}
