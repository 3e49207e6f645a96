//! PSK policy wrapper.
//!
//! The policy request and grant ride inside the handshake encrypted under
//! a key derived from the pre-shared secret, so a passive observer cannot
//! learn which traffic profile a client asked for. The PSK protects only
//! this wrapper; session data uses the HKDF-derived session key.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use sha2::{Digest, Sha256};

use crate::core::{AEAD_NONCE_SIZE, AEAD_TAG_SIZE, CryptoError};

/// Encrypt a policy payload under the PSK-derived key.
///
/// The key is `SHA-256(psk)`; the cipher is AES-256-GCM with a 12-byte
/// nonce and no additional data. The handshake reuses its own message
/// nonce here, which is fresh per message by construction.
pub fn psk_seal(plaintext: &[u8], psk: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = psk_cipher(psk, nonce)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt a policy payload under the PSK-derived key.
pub fn psk_open(ciphertext: &[u8], psk: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let cipher = psk_cipher(psk, nonce)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn psk_cipher(psk: &[u8], nonce: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if nonce.len() != AEAD_NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: AEAD_NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    let key = Sha256::digest(psk);
    Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)
}
