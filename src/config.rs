use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::performance::BucketCaps;
pub use crate::util::vec3::AxisMode;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cell_size must be positive and finite, got {0}")]
    InvalidCellSize(f32),
    #[error("target_frame_ms must be positive and finite, got {0}")]
    InvalidTargetFrame(f32),
    #[error("{kind} caps must satisfy healthy >= moderate >= heavy, got {healthy}/{moderate}/{heavy}")]
    CapsNotMonotonic {
        kind: &'static str,
        healthy: usize,
        moderate: usize,
        heavy: usize,
    },
    #[error("rtt_healthy_ms ({healthy}) cannot exceed rtt_moderate_ms ({moderate})")]
    RttThresholdsOutOfOrder { healthy: i64, moderate: i64 },
    #[error("{name} must be in (0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error("{name} must be a finite, non-negative number of seconds, got {value}")]
    InvalidDuration { name: &'static str, value: f32 },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Interest resolver configuration
///
/// Every field is runtime-tunable; see `SubscriptionResolver::set_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Which world axes form the interest plane
    pub axis_mode: AxisMode,
    /// Edge length of a grid cell in world units
    pub cell_size: f32,
    /// Seconds between resolve passes when driven by `update`
    pub update_interval_secs: f32,

    /// Per-viewpoint cap while frame cost is healthy
    pub cap_healthy: usize,
    /// Per-viewpoint cap while frame cost is moderate
    pub cap_moderate: usize,
    /// Per-viewpoint cap while frame cost is heavy
    pub cap_heavy: usize,
    /// Frame time in ms considered healthy (16.7 at 60fps)
    pub target_frame_ms: f32,
    /// Seconds of stable readings before the frame bucket changes
    pub cap_hysteresis_secs: f32,

    /// If false, RTT never tightens the cap
    pub tie_to_network_caps: bool,
    /// RTT at or below this is healthy
    pub rtt_healthy_ms: i64,
    /// RTT at or below this is moderate (above is heavy)
    pub rtt_moderate_ms: i64,
    pub net_cap_healthy: usize,
    pub net_cap_moderate: usize,
    pub net_cap_heavy: usize,

    /// Expose `clients_in_range` to gameplay systems
    pub range_query_enabled: bool,

    /// Rate-limited cap usage reports
    pub cap_debug_enabled: bool,
    /// Usage ratio at which a viewpoint is sampled as NEAR
    pub cap_warn_threshold: f32,
    /// Usage ratio at which a viewpoint is sampled as HIT
    pub cap_hit_threshold: f32,
    /// Maximum sampled viewpoints per report
    pub cap_debug_sample_players: usize,
    /// Minimum seconds between reports
    pub cap_debug_min_interval_secs: f32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            axis_mode: AxisMode::Xz,
            cell_size: 100.0,
            update_interval_secs: 1.0,
            cap_healthy: 256,
            cap_moderate: 124,
            cap_heavy: 64,
            target_frame_ms: 16.7,
            cap_hysteresis_secs: 2.0,
            tie_to_network_caps: true,
            rtt_healthy_ms: 80,
            rtt_moderate_ms: 160,
            net_cap_healthy: 256,
            net_cap_moderate: 124,
            net_cap_heavy: 64,
            range_query_enabled: true,
            cap_debug_enabled: true,
            cap_warn_threshold: 0.8,
            cap_hit_threshold: 1.0,
            cap_debug_sample_players: 3,
            cap_debug_min_interval_secs: 1.0,
        }
    }
}

/// Read and parse an environment variable, warning and returning None on bad input
fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

/// Convert seconds to a Duration, treating invalid values as zero
fn secs(value: f32) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f32(value)
    } else {
        Duration::ZERO
    }
}

impl ResolverConfig {
    /// Load config from `AOI_*` environment variables or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(mode) = env_value::<AxisMode>("AOI_AXIS_MODE") {
            config.axis_mode = mode;
        }
        if let Some(cell_size) = env_value::<f32>("AOI_CELL_SIZE") {
            if cell_size > 0.0 && cell_size.is_finite() {
                config.cell_size = cell_size;
            } else {
                tracing::warn!("AOI_CELL_SIZE must be > 0, using default");
            }
        }
        if let Some(interval) = env_value::<f32>("AOI_UPDATE_INTERVAL_SECS") {
            if interval >= 0.0 && interval.is_finite() {
                config.update_interval_secs = interval;
            } else {
                tracing::warn!("AOI_UPDATE_INTERVAL_SECS must be >= 0, using default");
            }
        }

        if let Some(v) = env_value("AOI_CAP_HEALTHY") {
            config.cap_healthy = v;
        }
        if let Some(v) = env_value("AOI_CAP_MODERATE") {
            config.cap_moderate = v;
        }
        if let Some(v) = env_value("AOI_CAP_HEAVY") {
            config.cap_heavy = v;
        }
        if let Some(v) = env_value("AOI_TARGET_FRAME_MS") {
            config.target_frame_ms = v;
        }
        if let Some(v) = env_value("AOI_CAP_HYSTERESIS_SECS") {
            config.cap_hysteresis_secs = v;
        }

        if let Some(v) = env_value("AOI_TIE_TO_NETWORK_CAPS") {
            config.tie_to_network_caps = v;
        }
        if let Some(v) = env_value("AOI_RTT_HEALTHY_MS") {
            config.rtt_healthy_ms = v;
        }
        if let Some(v) = env_value("AOI_RTT_MODERATE_MS") {
            config.rtt_moderate_ms = v;
        }
        if let Some(v) = env_value("AOI_NET_CAP_HEALTHY") {
            config.net_cap_healthy = v;
        }
        if let Some(v) = env_value("AOI_NET_CAP_MODERATE") {
            config.net_cap_moderate = v;
        }
        if let Some(v) = env_value("AOI_NET_CAP_HEAVY") {
            config.net_cap_heavy = v;
        }

        if let Some(v) = env_value("AOI_RANGE_QUERY_ENABLED") {
            config.range_query_enabled = v;
        }
        if let Some(v) = env_value("AOI_CAP_DEBUG") {
            config.cap_debug_enabled = v;
        }
        if let Some(v) = env_value("AOI_CAP_WARN_THRESHOLD") {
            config.cap_warn_threshold = v;
        }
        if let Some(v) = env_value("AOI_CAP_HIT_THRESHOLD") {
            config.cap_hit_threshold = v;
        }
        if let Some(v) = env_value("AOI_CAP_DEBUG_SAMPLE_PLAYERS") {
            config.cap_debug_sample_players = v;
        }
        if let Some(v) = env_value("AOI_CAP_DEBUG_MIN_INTERVAL_SECS") {
            config.cap_debug_min_interval_secs = v;
        }

        config
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Apply the fields present in a JSON document on top of this config
    pub fn overlay_json_str(&self, json: &str) -> Result<Self, ConfigError> {
        let mut merged = serde_json::to_value(self)?;
        let overlay: serde_json::Value = serde_json::from_str(json)?;
        match (&mut merged, overlay) {
            (serde_json::Value::Object(base), serde_json::Value::Object(fields)) => {
                base.extend(fields);
            }
            (_, other) => merged = other,
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// Read a JSON config file and apply it on top of this config
    pub fn overlay_json_file(&self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.overlay_json_str(&contents)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(ConfigError::InvalidCellSize(self.cell_size));
        }
        if !(self.target_frame_ms.is_finite() && self.target_frame_ms > 0.0) {
            return Err(ConfigError::InvalidTargetFrame(self.target_frame_ms));
        }
        self.frame_caps().check_monotonic("frame")?;
        self.network_caps().check_monotonic("network")?;
        if self.rtt_healthy_ms > self.rtt_moderate_ms {
            return Err(ConfigError::RttThresholdsOutOfOrder {
                healthy: self.rtt_healthy_ms,
                moderate: self.rtt_moderate_ms,
            });
        }
        for (name, value) in [
            ("cap_warn_threshold", self.cap_warn_threshold),
            ("cap_hit_threshold", self.cap_hit_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        for (name, value) in [
            ("update_interval_secs", self.update_interval_secs),
            ("cap_hysteresis_secs", self.cap_hysteresis_secs),
            ("cap_debug_min_interval_secs", self.cap_debug_min_interval_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidDuration { name, value });
            }
        }
        Ok(())
    }

    pub fn frame_caps(&self) -> BucketCaps {
        BucketCaps::new(self.cap_healthy, self.cap_moderate, self.cap_heavy)
    }

    pub fn network_caps(&self) -> BucketCaps {
        BucketCaps::new(self.net_cap_healthy, self.net_cap_moderate, self.net_cap_heavy)
    }

    pub fn update_interval(&self) -> Duration {
        secs(self.update_interval_secs)
    }

    pub fn cap_hysteresis(&self) -> Duration {
        secs(self.cap_hysteresis_secs)
    }

    pub fn cap_debug_min_interval(&self) -> Duration {
        secs(self.cap_debug_min_interval_secs)
    }
}
