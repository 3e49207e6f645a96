//! Established sessions and the frame data-plane.

mod pipe;

pub use pipe::run_session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::UserId;
use crate::crypto::{SecureRandom, SessionKey};
use crate::handshake::PolicyGrant;
use crate::morph::TrafficProfile;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// An established, keyed data-plane context between one client and one
/// server.
///
/// Created by a successful handshake on either side; dropped when the
/// data-plane loop returns.
pub struct Session {
    id: String,
    user_id: UserId,
    session_key: SessionKey,
    policy_grant: PolicyGrant,
    traffic_profile: TrafficProfile,
    created_at: SystemTime,
    last_activity: AtomicU64,
}

impl Session {
    /// Build a session from handshake output.
    pub fn new(
        user_id: UserId,
        session_key: SessionKey,
        policy_grant: PolicyGrant,
        rng: &dyn SecureRandom,
    ) -> Self {
        let mut id_bytes = [0u8; 8];
        rng.fill_random(&mut id_bytes);
        let traffic_profile = TrafficProfile::by_name(&policy_grant.policy);

        Self {
            id: hex(&id_bytes),
            user_id,
            session_key,
            policy_grant,
            traffic_profile,
            created_at: SystemTime::now(),
            last_activity: AtomicU64::new(unix_now()),
        }
    }

    /// Opaque session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The authenticated user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The derived session key.
    pub fn key(&self) -> &SessionKey {
        &self.session_key
    }

    /// The policy the server granted.
    pub fn policy_grant(&self) -> &PolicyGrant {
        &self.policy_grant
    }

    /// Snapshot of the traffic profile taken at establishment.
    pub fn traffic_profile(&self) -> &TrafficProfile {
        &self.traffic_profile
    }

    /// When the handshake completed.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Unix seconds of the most recent frame in either direction.
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Stamp activity now.
    pub fn touch(&self) {
        self.last_activity.store(unix_now(), Ordering::Relaxed);
    }
}
