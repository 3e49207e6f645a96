//! Size, timing, and burst controllers.
//!
//! Each controller holds its own state and draws exclusively from the
//! crypto randomness seam; padding bytes are random so they carry no
//! structure an observer could key on.

use std::time::{Duration, Instant};

use crate::crypto::SecureRandom;

use super::profile::TrafficProfile;

/// Probability that an eligible quiet period starts a new burst.
const BURST_TRIGGER_PROBABILITY: f64 = 0.10;

/// Pads outgoing payloads toward the profile's packet sizes.
pub struct SizeController {
    max_packet_size: usize,
    padding_ratio: f64,
    original_bytes: u64,
    padded_bytes: u64,
}

impl SizeController {
    /// Create a controller for the given profile.
    pub fn new(profile: &TrafficProfile) -> Self {
        Self {
            max_packet_size: profile.max_packet_size,
            padding_ratio: profile.padding_ratio,
            original_bytes: 0,
            padded_bytes: 0,
        }
    }

    /// Possibly append random padding to `payload`.
    ///
    /// With probability `padding_ratio`, extends the payload by a random
    /// amount bounded so the result never exceeds the profile's
    /// `max_packet_size`. Payloads already at or above that size pass
    /// through untouched.
    pub fn pad(&mut self, payload: &mut Vec<u8>, rng: &dyn SecureRandom) {
        let original = payload.len();
        self.original_bytes += original as u64;

        if original < self.max_packet_size && rng.random_float_01() < self.padding_ratio {
            let headroom = self.max_packet_size - original;
            let extra = (rng.random_float_01() * (headroom + 1) as f64) as usize;
            let extra = extra.min(headroom);
            if extra > 0 {
                let start = payload.len();
                payload.resize(start + extra, 0);
                rng.fill_random(&mut payload[start..]);
            }
        }

        self.padded_bytes += payload.len() as u64;
    }

    /// Total bytes submitted before padding.
    pub fn original_bytes(&self) -> u64 {
        self.original_bytes
    }

    /// Total bytes emitted after padding.
    pub fn padded_bytes(&self) -> u64 {
        self.padded_bytes
    }
}

/// Draws inter-frame delays from the profile's normal distribution.
pub struct TimingController {
    mean: f64,
    stddev: f64,
}

impl TimingController {
    /// Create a controller for the given profile.
    pub fn new(profile: &TrafficProfile) -> Self {
        Self {
            mean: profile.interval_mean.as_secs_f64(),
            stddev: profile.interval_stddev.as_secs_f64(),
        }
    }

    /// Next inter-frame delay, drawn from `N(mean, stddev)` via the
    /// Box-Muller transform. Negative draws are replaced with `mean / 4`.
    pub fn next_delay(&self, rng: &dyn SecureRandom) -> Duration {
        if self.mean == 0.0 && self.stddev == 0.0 {
            return Duration::ZERO;
        }

        // Box-Muller; shift the first draw off zero so ln() is defined.
        let u1 = (1.0 - rng.random_float_01()).max(f64::MIN_POSITIVE);
        let u2 = rng.random_float_01();
        let gaussian = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

        let secs = self.mean + self.stddev * gaussian;
        if secs < 0.0 {
            Duration::from_secs_f64(self.mean / 4.0)
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Groups frames into bursts the way real applications do.
pub struct BurstController {
    burst_size: u32,
    burst_interval: Duration,
    burst_active: bool,
    burst_remaining: u32,
    last_burst_time: Instant,
}

impl BurstController {
    /// Create a controller for the given profile.
    pub fn new(profile: &TrafficProfile) -> Self {
        Self {
            burst_size: profile.burst_size,
            burst_interval: profile.burst_interval,
            burst_active: false,
            burst_remaining: 0,
            last_burst_time: Instant::now(),
        }
    }

    /// Whether the next frame belongs to a burst.
    ///
    /// While a burst is active this decrements the remaining count and
    /// returns `true`. Once quiet for at least `burst_interval`, a new
    /// burst of `burst_size` frames starts with 10% probability.
    pub fn in_burst(&mut self, rng: &dyn SecureRandom) -> bool {
        if self.burst_active {
            self.burst_remaining = self.burst_remaining.saturating_sub(1);
            if self.burst_remaining == 0 {
                self.burst_active = false;
                self.last_burst_time = Instant::now();
            }
            return true;
        }

        if self.burst_size > 0
            && self.last_burst_time.elapsed() >= self.burst_interval
            && rng.random_float_01() < BURST_TRIGGER_PROBABILITY
        {
            self.burst_active = true;
            self.burst_remaining = self.burst_size.saturating_sub(1);
            if self.burst_remaining == 0 {
                self.burst_active = false;
                self.last_burst_time = Instant::now();
            }
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{SeededRandom, SystemRandom};

    #[test]
    fn test_padding_never_exceeds_max() {
        let profile = TrafficProfile::chat();
        let mut ctrl = SizeController::new(&profile);
        let rng = SystemRandom::new();

        for _ in 0..10_000 {
            let mut payload = vec![0xAA; 80];
            ctrl.pad(&mut payload, &rng);
            assert!(payload.len() >= 80);
            assert!(payload.len() <= profile.max_packet_size);
        }
    }

    #[test]
    fn test_oversized_payload_untouched() {
        let profile = TrafficProfile::chat();
        let mut ctrl = SizeController::new(&profile);
        let rng = SystemRandom::new();

        // 500 bytes through a profile whose max is 200: no headroom, so
        // every payload passes through unchanged.
        for _ in 0..10_000 {
            let mut payload = vec![0x55; 500];
            ctrl.pad(&mut payload, &rng);
            assert_eq!(payload.len(), 500);
        }
        assert_eq!(ctrl.original_bytes(), ctrl.padded_bytes());
    }

    #[test]
    fn test_padding_frequency_tracks_ratio() {
        let profile = TrafficProfile::chat();
        let mut ctrl = SizeController::new(&profile);
        let rng = SeededRandom::new(0xC0FFEE);

        let mut padded = 0u32;
        for _ in 0..10_000 {
            let mut payload = vec![0x11; 80];
            ctrl.pad(&mut payload, &rng);
            if payload.len() > 80 {
                padded += 1;
            }
        }

        // padding_ratio 0.25; allow a generous band around it (a draw of
        // zero extra bytes also counts toward the trigger rate).
        let rate = padded as f64 / 10_000.0;
        assert!(rate > 0.15 && rate < 0.35, "rate {rate}");
    }

    #[test]
    fn test_delays_nonnegative_and_plausible() {
        let profile = TrafficProfile::web();
        let ctrl = TimingController::new(&profile);
        let rng = SystemRandom::new();

        let mut total = Duration::ZERO;
        for _ in 0..1000 {
            let d = ctrl.next_delay(&rng);
            assert!(d < Duration::from_secs(1));
            total += d;
        }

        // Mean 50ms with replacement of negative draws at 12.5ms: the
        // average of 1000 draws lands well inside this band.
        let avg = total / 1000;
        assert!(avg > Duration::from_millis(20), "avg {avg:?}");
        assert!(avg < Duration::from_millis(80), "avg {avg:?}");
    }

    #[test]
    fn test_raw_profile_has_no_delay() {
        let ctrl = TimingController::new(&TrafficProfile::raw());
        let rng = SystemRandom::new();
        assert_eq!(ctrl.next_delay(&rng), Duration::ZERO);
    }

    #[test]
    fn test_burst_runs_to_length() {
        let mut profile = TrafficProfile::web();
        profile.burst_interval = Duration::ZERO;
        let mut ctrl = BurstController::new(&profile);
        let rng = SystemRandom::new();

        // Wait for a burst to trigger, then every remaining frame of it
        // must report in-burst.
        let mut started = false;
        for _ in 0..10_000 {
            if ctrl.in_burst(&rng) {
                started = true;
                break;
            }
        }
        assert!(started, "a burst should trigger within 10k attempts");
        for _ in 1..profile.burst_size {
            assert!(ctrl.in_burst(&rng));
        }
    }

    #[test]
    fn test_no_burst_before_interval() {
        let mut profile = TrafficProfile::web();
        profile.burst_interval = Duration::from_secs(3600);
        let mut ctrl = BurstController::new(&profile);
        let rng = SystemRandom::new();

        for _ in 0..1000 {
            assert!(!ctrl.in_burst(&rng));
        }
    }
}
