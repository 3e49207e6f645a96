//! Cryptographic primitives for the Sush protocol.
//!
//! - [`keys`]: X25519 key agreement
//! - [`kdf`]: HKDF-SHA256 session key derivation
//! - [`aead`]: ChaCha20-Poly1305 for the frame stream
//! - [`psk`]: AES-256-GCM wrapper for handshake policy payloads
//! - [`replay`]: time-windowed handshake nonce cache
//! - [`rng`]: randomness seam with a deterministic test implementation

mod aead;
mod kdf;
mod keys;
mod psk;
mod replay;
mod rng;

pub use aead::{SessionKey, aead_open, aead_seal, ct_eq};
pub use kdf::derive_session_key;
pub use keys::{EphemeralKeypair, SharedSecret};
pub use psk::{psk_open, psk_seal};
pub use replay::{HandshakeNonce, ReplayCache};
pub use rng::{SecureRandom, SeededRandom, SystemRandom};
