//! Endpoint metrics.
//!
//! Counters are plain atomics updated from any task; handshake latency
//! goes through a fixed-size reservoir guarded by a short mutex so
//! percentile queries stay cheap no matter how many samples arrive.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Capacity of the latency reservoir.
const RESERVOIR_CAPACITY: usize = 1024;

/// Fixed-size reservoir of latency samples with uniform replacement.
pub struct LatencyReservoir {
    inner: Mutex<ReservoirInner>,
}

struct ReservoirInner {
    samples: Vec<f64>,
    seen: u64,
    rng_state: u64,
}

impl LatencyReservoir {
    /// Create an empty reservoir.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ReservoirInner {
                samples: Vec::with_capacity(RESERVOIR_CAPACITY),
                seen: 0,
                rng_state: 0x853C_49E6_748F_EA9B,
            }),
        }
    }

    /// Record a latency sample.
    pub fn record(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.seen += 1;

        let value = latency.as_secs_f64();
        if inner.samples.len() < RESERVOIR_CAPACITY {
            inner.samples.push(value);
            return;
        }

        // Uniform replacement keeps the reservoir an unbiased sample.
        inner.rng_state ^= inner.rng_state << 13;
        inner.rng_state ^= inner.rng_state >> 7;
        inner.rng_state ^= inner.rng_state << 17;
        let slot = inner.rng_state % inner.seen;
        if (slot as usize) < RESERVOIR_CAPACITY {
            let idx = slot as usize;
            inner.samples[idx] = value;
        }
    }

    /// The `p`-th percentile (`0.0..=1.0`) of retained samples.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.samples.is_empty() {
            return None;
        }
        let mut sorted = inner.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = (p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
        Some(Duration::from_secs_f64(sorted[rank]))
    }

    /// Total samples ever recorded.
    pub fn seen(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).seen
    }
}

impl Default for LatencyReservoir {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for everything the server observes.
#[derive(Default)]
pub struct Metrics {
    /// Completed handshakes.
    pub handshakes_ok: AtomicU64,
    /// Handshakes rejected for a replayed nonce.
    pub replays_rejected: AtomicU64,
    /// Handshakes rejected for clock skew.
    pub timestamp_skews: AtomicU64,
    /// Handshakes rejected for an unknown user.
    pub auth_failures: AtomicU64,
    /// Sessions torn down on an AEAD failure.
    pub decrypt_failures: AtomicU64,

    /// Frames sent into the tunnel.
    pub frames_tx: AtomicU64,
    /// Frames received from the tunnel.
    pub frames_rx: AtomicU64,
    /// Payload bytes sent into the tunnel.
    pub bytes_tx: AtomicU64,
    /// Payload bytes received from the tunnel.
    pub bytes_rx: AtomicU64,

    /// Connections handed to the HTTP decoy.
    pub fallback_http: AtomicU64,
    /// Connections handed to the TCP decoy.
    pub fallback_tcp: AtomicU64,
    /// Connections answered with a canned response.
    pub fallback_static: AtomicU64,

    /// Currently established sessions.
    pub active_sessions: AtomicU64,
}

/// Shared metrics handle: counters plus handshake latency percentiles.
#[derive(Default)]
pub struct MetricsRegistry {
    /// Event counters.
    pub counters: Metrics,
    /// Handshake completion latency.
    pub handshake_latency: LatencyReservoir,
}

impl MetricsRegistry {
    /// Create a fresh registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Metrics {
    /// Increment a counter.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to a counter.
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Decrement a gauge, saturating at zero.
    pub fn decr(counter: &AtomicU64) {
        let _ =
            counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    /// Read a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_ops() {
        let m = Metrics::default();
        Metrics::incr(&m.handshakes_ok);
        Metrics::incr(&m.handshakes_ok);
        Metrics::add(&m.bytes_tx, 512);
        assert_eq!(Metrics::get(&m.handshakes_ok), 2);
        assert_eq!(Metrics::get(&m.bytes_tx), 512);

        Metrics::incr(&m.active_sessions);
        Metrics::decr(&m.active_sessions);
        Metrics::decr(&m.active_sessions);
        assert_eq!(Metrics::get(&m.active_sessions), 0);
    }

    #[test]
    fn test_reservoir_percentiles() {
        let r = LatencyReservoir::new();
        for ms in 1..=100 {
            r.record(Duration::from_millis(ms));
        }

        let p50 = r.percentile(0.5).unwrap();
        assert!(p50 >= Duration::from_millis(45) && p50 <= Duration::from_millis(55));

        let p99 = r.percentile(0.99).unwrap();
        assert!(p99 >= Duration::from_millis(95));
        assert_eq!(r.seen(), 100);
    }

    #[test]
    fn test_reservoir_bounded() {
        let r = LatencyReservoir::new();
        for i in 0..10_000u64 {
            r.record(Duration::from_micros(i));
        }
        assert_eq!(r.seen(), 10_000);
        // Still answers percentile queries after overflow.
        assert!(r.percentile(0.9).is_some());
    }

    #[test]
    fn test_empty_reservoir() {
        let r = LatencyReservoir::new();
        assert!(r.percentile(0.5).is_none());
    }
}
