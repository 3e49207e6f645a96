//! X25519 key agreement.
//!
//! Provides ephemeral keypair generation and shared-secret computation for
//! the Sush handshake. Private material is zeroized on drop.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::core::{PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};

/// An X25519 keypair generated fresh for each handshake.
#[derive(Clone)]
pub struct EphemeralKeypair {
    /// Private scalar (32 bytes) - zeroized on drop.
    private: [u8; PRIVATE_KEY_SIZE],
    /// Public point (32 bytes).
    public: [u8; PUBLIC_KEY_SIZE],
}

impl EphemeralKeypair {
    /// Generate a new random keypair from the system CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private: secret.to_bytes(),
            public: *public.as_bytes(),
        }
    }

    /// Create a keypair from existing key material.
    pub fn from_bytes(private: [u8; PRIVATE_KEY_SIZE], public: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self { private, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    /// Compute the X25519 shared secret with a remote public key.
    ///
    /// # Arguments
    /// * `peer_public` - The remote party's public key
    ///
    /// # Returns
    /// The 32-byte shared secret, zeroized on drop
    pub fn shared_secret(&self, peer_public: &[u8; PUBLIC_KEY_SIZE]) -> SharedSecret {
        let secret = StaticSecret::from(self.private);
        let public = PublicKey::from(*peer_public);
        let shared = secret.diffie_hellman(&public);
        SharedSecret(*shared.as_bytes())
    }
}

impl Drop for EphemeralKeypair {
    fn drop(&mut self) {
        self.private.zeroize();
    }
}

/// Result of an X25519 scalar multiplication.
///
/// Zeroized on drop; only consumed by the session key derivation.
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Get the raw secret bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
