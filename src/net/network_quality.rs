//! RTT-based network load classification
//!
//! Stateless: RTT is already smoothed by the transport's estimator, so no
//! hysteresis is applied here.

use crate::config::ResolverConfig;
use crate::game::performance::{BucketCaps, LoadBucket};

/// Maps a client's round-trip time to a load bucket and cap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkQualityClassifier {
    /// When false every client is treated as unconstrained
    enabled: bool,
    rtt_healthy_ms: i64,
    rtt_moderate_ms: i64,
    caps: BucketCaps,
}

impl NetworkQualityClassifier {
    pub fn new(enabled: bool, rtt_healthy_ms: i64, rtt_moderate_ms: i64, caps: BucketCaps) -> Self {
        Self {
            enabled,
            rtt_healthy_ms,
            rtt_moderate_ms,
            caps,
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(
            config.tie_to_network_caps,
            config.rtt_healthy_ms,
            config.rtt_moderate_ms,
            config.network_caps(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Bucket for an RTT sample; unknown (<= 0) RTT is assumed healthy
    pub fn classify(&self, rtt_ms: i64) -> LoadBucket {
        if !self.enabled || rtt_ms <= 0 {
            return LoadBucket::Healthy;
        }

        if rtt_ms <= self.rtt_healthy_ms {
            LoadBucket::Healthy
        } else if rtt_ms <= self.rtt_moderate_ms {
            LoadBucket::Moderate
        } else {
            LoadBucket::Heavy
        }
    }

    /// Cap imposed by the network, or None when the network tie-in is off
    pub fn network_cap(&self, rtt_ms: i64) -> Option<usize> {
        if !self.enabled {
            return None;
        }
        Some(self.caps.cap(self.classify(rtt_ms)))
    }

    /// Binding cap for a viewpoint: the lower of frame cap and network cap
    #[inline]
    pub fn effective_cap(&self, frame_cap: usize, rtt_ms: i64) -> usize {
        match self.network_cap(rtt_ms) {
            Some(network_cap) => frame_cap.min(network_cap),
            None => frame_cap,
        }
    }
}

impl Default for NetworkQualityClassifier {
    fn default() -> Self {
        Self::from_config(&ResolverConfig::default())
    }
}
