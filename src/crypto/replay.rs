//! Handshake replay defense.
//!
//! Handshake nonces are random rather than sequential, so replay defense
//! is a time-windowed set instead of a sliding bitmap: a nonce is accepted
//! exactly once within the retention window. Entries expire lazily; each
//! insert first drains aged-out entries from the front of the insertion
//! queue, which keeps eviction O(1) amortized.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::{AEAD_NONCE_SIZE, REPLAY_CACHE_CAPACITY, REPLAY_MAX_AGE};

/// A handshake nonce as stored in the cache.
pub type HandshakeNonce = [u8; AEAD_NONCE_SIZE];

struct ReplayCacheInner {
    seen: HashMap<HandshakeNonce, Instant>,
    order: VecDeque<(HandshakeNonce, Instant)>,
}

/// Per-process cache of recently seen handshake nonces.
///
/// Shared by all server handshakes behind a single mutex; the critical
/// section is a couple of map operations.
pub struct ReplayCache {
    inner: Mutex<ReplayCacheInner>,
    max_age: Duration,
    capacity: usize,
}

impl ReplayCache {
    /// Create a cache with the default window and capacity.
    pub fn new() -> Self {
        Self::with_limits(REPLAY_MAX_AGE, REPLAY_CACHE_CAPACITY)
    }

    /// Create a cache with explicit limits.
    pub fn with_limits(max_age: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ReplayCacheInner {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_age,
            capacity,
        }
    }

    /// Record a nonce if it has not been seen within the window.
    ///
    /// Returns `true` if the nonce was unseen and is now recorded. Returns
    /// `false` for a replayed nonce, and also when the cache is saturated:
    /// refusing the handshake is safer than forgetting a nonce early.
    pub fn check_and_add(&self, nonce: &HandshakeNonce) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Lazy sweep: drop entries that fell out of the window.
        while let Some(&(front, inserted)) = inner.order.front() {
            if now.duration_since(inserted) <= self.max_age {
                break;
            }
            inner.order.pop_front();
            inner.seen.remove(&front);
        }

        if inner.seen.contains_key(nonce) {
            return false;
        }
        if inner.seen.len() >= self.capacity {
            return false;
        }

        inner.seen.insert(*nonce, now);
        inner.order.push_back((*nonce, now));
        true
    }

    /// Number of nonces currently retained.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).seen.len()
    }

    /// Whether the cache holds no nonces.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}
