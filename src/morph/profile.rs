//! Named traffic profiles.
//!
//! A profile is a statistical description of the application the tunnel
//! should resemble. Values are fixed per name; a profile is immutable
//! after construction.

use std::time::Duration;

/// Statistical shape of a mimicked application.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficProfile {
    /// Profile name as negotiated.
    pub name: &'static str,
    /// Smallest packet the application emits.
    pub min_packet_size: usize,
    /// Largest packet the application emits; padding never exceeds this.
    pub max_packet_size: usize,
    /// Typical packet size.
    pub avg_packet_size: usize,
    /// Mean inter-packet interval.
    pub interval_mean: Duration,
    /// Standard deviation of the inter-packet interval.
    pub interval_stddev: Duration,
    /// Frames per burst.
    pub burst_size: u32,
    /// Minimum spacing between bursts.
    pub burst_interval: Duration,
    /// Probability that an outgoing payload receives padding.
    pub padding_ratio: f64,
    /// Upload share of total traffic, in `[0, 1]`.
    pub direction_bias: f64,
}

impl TrafficProfile {
    /// The pass-through profile: no padding, no delays, no bursts.
    pub fn raw() -> Self {
        Self {
            name: "raw",
            min_packet_size: 0,
            max_packet_size: 0,
            avg_packet_size: 0,
            interval_mean: Duration::ZERO,
            interval_stddev: Duration::ZERO,
            burst_size: 0,
            burst_interval: Duration::ZERO,
            padding_ratio: 0.0,
            direction_bias: 0.5,
        }
    }

    /// Browser-like request/response traffic.
    pub fn web() -> Self {
        Self {
            name: "mimic-http2-api",
            min_packet_size: 64,
            max_packet_size: 1500,
            avg_packet_size: 800,
            interval_mean: Duration::from_millis(50),
            interval_stddev: Duration::from_millis(20),
            burst_size: 5,
            burst_interval: Duration::from_secs(2),
            padding_ratio: 0.15,
            direction_bias: 0.3,
        }
    }

    /// Steady media-segment download traffic.
    pub fn video() -> Self {
        Self {
            name: "mimic-video-stream",
            min_packet_size: 200,
            max_packet_size: 1500,
            avg_packet_size: 1200,
            interval_mean: Duration::from_millis(33),
            interval_stddev: Duration::from_millis(10),
            burst_size: 10,
            burst_interval: Duration::from_secs(1),
            padding_ratio: 0.10,
            direction_bias: 0.05,
        }
    }

    /// Sustained bulk-upload traffic.
    pub fn bulk() -> Self {
        Self {
            name: "mimic-git-push",
            min_packet_size: 1000,
            max_packet_size: 1500,
            avg_packet_size: 1400,
            interval_mean: Duration::from_millis(10),
            interval_stddev: Duration::from_millis(5),
            burst_size: 20,
            burst_interval: Duration::from_millis(500),
            padding_ratio: 0.05,
            direction_bias: 0.9,
        }
    }

    /// Sparse interactive traffic.
    pub fn chat() -> Self {
        Self {
            name: "mimic-zoom-call",
            min_packet_size: 32,
            max_packet_size: 200,
            avg_packet_size: 80,
            interval_mean: Duration::from_millis(500),
            interval_stddev: Duration::from_millis(200),
            burst_size: 3,
            burst_interval: Duration::from_secs(5),
            padding_ratio: 0.25,
            direction_bias: 0.5,
        }
    }

    /// Resolve a profile by its negotiated name; unknown names fall back
    /// to [`TrafficProfile::raw`].
    pub fn by_name(name: &str) -> Self {
        match name {
            "mimic-http2-api" => Self::web(),
            "mimic-video-stream" => Self::video(),
            "mimic-git-push" => Self::bulk(),
            "mimic-zoom-call" => Self::chat(),
            _ => Self::raw(),
        }
    }

    /// Whether `name` is one of the recognized profile names.
    pub fn is_known(name: &str) -> bool {
        matches!(
            name,
            "raw" | "mimic-http2-api" | "mimic-video-stream" | "mimic-git-push" | "mimic-zoom-call"
        )
    }

    /// Whether this profile shapes traffic at all.
    pub fn is_raw(&self) -> bool {
        self.name == "raw"
    }

    /// Sampled packet-size distribution.
    pub fn packet_sizes(&self) -> [usize; 3] {
        [self.min_packet_size, self.avg_packet_size, self.max_packet_size]
    }

    /// Sampled inter-packet interval distribution, in seconds.
    pub fn intervals(&self) -> [f64; 3] {
        let mean = self.interval_mean.as_secs_f64();
        let dev = self.interval_stddev.as_secs_f64();
        [(mean - dev).max(0.0), mean, mean + dev]
    }

    /// Sampled burst-length distribution.
    pub fn burst_patterns(&self) -> [u32; 3] {
        [1, self.burst_size / 2, self.burst_size]
    }
}
