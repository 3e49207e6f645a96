//! Authorized-user lookup.
//!
//! `validate` sits on the handshake hot path and must never block behind a
//! writer, so the table is copy-on-write: readers load an atomic snapshot
//! of an immutable map, writers serialize through a mutex, rebuild the map,
//! and publish it with a pointer swap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::core::USER_ID_SIZE;

/// A 16-byte user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId([u8; USER_ID_SIZE]);

impl UserId {
    /// Wrap exactly 16 bytes.
    pub fn from_bytes(bytes: [u8; USER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Normalize arbitrary input to 16 bytes: longer input is truncated,
    /// shorter input is left-padded with zero bytes.
    pub fn normalize(input: &[u8]) -> Self {
        let mut id = [0u8; USER_ID_SIZE];
        if input.len() >= USER_ID_SIZE {
            id.copy_from_slice(&input[..USER_ID_SIZE]);
        } else {
            id[USER_ID_SIZE - input.len()..].copy_from_slice(input);
        }
        Self(id)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; USER_ID_SIZE] {
        &self.0
    }
}

/// An authorized user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// The user's identifier.
    pub id: UserId,
    /// Contact address, informational only.
    pub email: String,
    /// Preferred traffic policy, consulted when granting.
    pub policy: String,
    /// Per-user PSK override for the handshake policy wrapper.
    pub psk: Option<String>,
}

/// Copy-on-write table of authorized users.
pub struct UserTable {
    snapshot: ArcSwap<HashMap<UserId, UserRecord>>,
    writers: Mutex<()>,
}

impl UserTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            writers: Mutex::new(()),
        }
    }

    /// Add or replace a user.
    pub fn add(&self, user: UserRecord) {
        let _guard = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        let mut next: HashMap<UserId, UserRecord> = (**self.snapshot.load()).clone();
        next.insert(user.id, user);
        self.snapshot.store(Arc::new(next));
    }

    /// Remove a user; returns whether it existed.
    pub fn remove(&self, id: &UserId) -> bool {
        let _guard = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        let mut next: HashMap<UserId, UserRecord> = (**self.snapshot.load()).clone();
        let existed = next.remove(id).is_some();
        self.snapshot.store(Arc::new(next));
        existed
    }

    /// Whether the identifier is authorized. Lock-free.
    pub fn validate(&self, id: &UserId) -> bool {
        self.snapshot.load().contains_key(id)
    }

    /// Look up a user record. Lock-free.
    pub fn get(&self, id: &UserId) -> Option<UserRecord> {
        self.snapshot.load().get(id).cloned()
    }

    /// Number of authorized users.
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UserTable {
    fn default() -> Self {
        Self::new()
    }
}
