//! Randomness seam.
//!
//! Nonces, padding bytes, and the morpher's draws all come through this
//! trait so that tests can substitute a deterministic source. The default
//! implementation reads the system CSPRNG and only degrades to a
//! time-seeded generator if the CSPRNG read itself fails.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use rand::rngs::OsRng;

use crate::core::AEAD_NONCE_SIZE;

/// Source of randomness for nonces, padding, and traffic shaping.
pub trait SecureRandom: Send + Sync {
    /// Fill `buf` with random bytes.
    fn fill_random(&self, buf: &mut [u8]);

    /// A uniform draw from `[0, 1)`.
    fn random_float_01(&self) -> f64 {
        let mut bytes = [0u8; 8];
        self.fill_random(&mut bytes);
        // 53 mantissa bits of uniformity.
        (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
    }

    /// A fresh 12-byte nonce.
    fn random_nonce(&self) -> [u8; AEAD_NONCE_SIZE] {
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        self.fill_random(&mut nonce);
        nonce
    }
}

/// CSPRNG-backed randomness.
#[derive(Clone, Copy, Default)]
pub struct SystemRandom;

impl SystemRandom {
    /// Create a system randomness source.
    pub fn new() -> Self {
        Self
    }
}

impl SecureRandom for SystemRandom {
    fn fill_random(&self, buf: &mut [u8]) {
        if OsRng.try_fill_bytes(buf).is_ok() {
            return;
        }
        // CSPRNG unavailable: degrade to a time-seeded generator rather
        // than stall the data-plane.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E37_79B9_7F4A_7C15);
        let mut state = seed | 1;
        for byte in buf.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *byte = state as u8;
        }
    }
}

/// Deterministic randomness for tests; splitmix64 over a seed.
pub struct SeededRandom {
    state: Mutex<u64>,
}

impl SeededRandom {
    /// Create a generator with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: Mutex::new(seed) }
    }

    fn next_u64(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = *state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl SecureRandom for SeededRandom {
    fn fill_random(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}
