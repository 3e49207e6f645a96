//! Traffic morphing.
//!
//! Shapes the size, timing, and burst structure of the outgoing frame
//! stream toward a named application profile. Morphing happens before
//! sealing, so the AEAD additional data always reflects the transmitted
//! length.

mod profile;
mod shaper;

pub use profile::TrafficProfile;
pub use shaper::{BurstController, SizeController, TimingController};

use std::sync::Arc;
use std::time::Duration;

use crate::crypto::SecureRandom;

/// Per-session traffic morpher combining the three controllers.
pub struct TrafficMorpher {
    profile: TrafficProfile,
    enabled: bool,
    size: SizeController,
    timing: TimingController,
    burst: BurstController,
    rng: Arc<dyn SecureRandom>,
}

impl TrafficMorpher {
    /// Create a morpher for `profile`.
    ///
    /// A disabled morpher, or one with the `raw` profile, passes payloads
    /// through untouched and never delays.
    pub fn new(profile: TrafficProfile, enabled: bool, rng: Arc<dyn SecureRandom>) -> Self {
        let enabled = enabled && !profile.is_raw();
        Self {
            size: SizeController::new(&profile),
            timing: TimingController::new(&profile),
            burst: BurstController::new(&profile),
            profile,
            enabled,
            rng,
        }
    }

    /// The profile this morpher shapes toward.
    pub fn profile(&self) -> &TrafficProfile {
        &self.profile
    }

    /// Apply size shaping to an outgoing payload.
    pub fn shape_payload(&mut self, payload: &mut Vec<u8>) {
        if self.enabled {
            self.size.pad(payload, self.rng.as_ref());
        }
    }

    /// Delay to apply before the next frame. Zero while a burst is
    /// active, so burst frames leave back-to-back.
    pub fn next_delay(&mut self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        if self.burst.in_burst(self.rng.as_ref()) {
            Duration::ZERO
        } else {
            self.timing.next_delay(self.rng.as_ref())
        }
    }

    /// Handle a peer's padding parameter adjustment.
    ///
    /// The payload is an opaque parameter blob; this version accepts the
    /// frame and leaves the local parameters unchanged.
    pub fn apply_padding_ctrl(&mut self, _params: &[u8]) {}

    /// Handle a peer's timing parameter adjustment. Accepted and ignored,
    /// as with padding adjustments.
    pub fn apply_timing_ctrl(&mut self, _params: &[u8]) {}

    /// Total bytes submitted before padding.
    pub fn original_bytes(&self) -> u64 {
        self.size.original_bytes()
    }

    /// Total bytes emitted after padding.
    pub fn padded_bytes(&self) -> u64 {
        self.size.padded_bytes()
    }
}
