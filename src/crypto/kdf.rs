//! Session key derivation.
//!
//! Both peers feed the X25519 shared secret and the two handshake nonces
//! through HKDF-SHA256 and arrive at the same 32-byte session key:
//!
//! ```text
//! session_key = HKDF-SHA256(
//!     ikm  = shared_secret,
//!     salt = client_nonce || server_nonce,   // exactly 24 bytes
//!     info = "Sush-session-key-v1",
//! )
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::core::{AEAD_NONCE_SIZE, CryptoError, SESSION_KEY_INFO, SESSION_KEY_SIZE};

use super::aead::SessionKey;
use super::keys::SharedSecret;

/// Derive the session key from the shared secret and handshake nonces.
///
/// Deterministic: identical inputs produce identical keys on both peers.
pub fn derive_session_key(
    shared: &SharedSecret,
    client_nonce: &[u8; AEAD_NONCE_SIZE],
    server_nonce: &[u8; AEAD_NONCE_SIZE],
) -> Result<SessionKey, CryptoError> {
    let mut salt = [0u8; AEAD_NONCE_SIZE * 2];
    salt[..AEAD_NONCE_SIZE].copy_from_slice(client_nonce);
    salt[AEAD_NONCE_SIZE..].copy_from_slice(server_nonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut okm = [0u8; SESSION_KEY_SIZE];
    hk.expand(SESSION_KEY_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;

    let key = SessionKey::from_bytes(okm);
    okm.zeroize();
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::EphemeralKeypair;

    #[test]
    fn test_derivation_deterministic() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();
        let client_nonce = [0x11; AEAD_NONCE_SIZE];
        let server_nonce = [0x22; AEAD_NONCE_SIZE];

        let k1 = derive_session_key(&a.shared_secret(b.public_key()), &client_nonce, &server_nonce)
            .unwrap();
        let k2 = derive_session_key(&a.shared_secret(b.public_key()), &client_nonce, &server_nonce)
            .unwrap();

        assert_eq!(hex::encode(k1.as_bytes()), hex::encode(k2.as_bytes()));
    }

    #[test]
    fn test_both_peers_derive_same_key() {
        let client = EphemeralKeypair::generate();
        let server = EphemeralKeypair::generate();
        let client_nonce = [0x01; AEAD_NONCE_SIZE];
        let server_nonce = [0x02; AEAD_NONCE_SIZE];

        let client_key = derive_session_key(
            &client.shared_secret(server.public_key()),
            &client_nonce,
            &server_nonce,
        )
        .unwrap();
        let server_key = derive_session_key(
            &server.shared_secret(client.public_key()),
            &client_nonce,
            &server_nonce,
        )
        .unwrap();

        assert_eq!(client_key.as_bytes(), server_key.as_bytes());
    }

    #[test]
    fn test_nonces_change_key() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();
        let shared = a.shared_secret(b.public_key());

        let k1 = derive_session_key(&shared, &[0x01; 12], &[0x02; 12]).unwrap();
        let k2 = derive_session_key(&shared, &[0x02; 12], &[0x01; 12]).unwrap();

        // Swapping the nonce order must produce a different key.
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
