//! Rate-limited cap utilization reports
//!
//! Purely observational. Sinks may fail; failures are logged at debug level
//! and dropped so they never reach the resolver.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::ResolverConfig;
use crate::game::performance::LoadBucket;
use crate::game::world::{ConnectionId, EntityId};

/// Upper bound on the sample buffer allocated up front
const SAMPLE_INITIAL_CAPACITY: usize = 16;

/// Telemetry sink errors
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry sink unavailable: {0}")]
    Unavailable(String),
    #[error("telemetry sink rejected report: {0}")]
    Rejected(String),
}

/// Outcome of one viewpoint in one pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewpointSample {
    pub connection_id: ConnectionId,
    pub viewpoint: EntityId,
    /// Entities kept after truncation
    pub kept: usize,
    /// Effective cap for this viewpoint
    pub cap: usize,
    /// Candidates dropped by distance truncation
    pub trimmed: usize,
}

impl ViewpointSample {
    /// kept / cap, or 0 when the cap is 0
    pub fn usage(&self) -> f32 {
        if self.cap == 0 {
            0.0
        } else {
            self.kept as f32 / self.cap as f32
        }
    }
}

/// How close a sampled viewpoint is to its cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapLevel {
    Near,
    Hit,
}

impl CapLevel {
    pub fn tag(self) -> &'static str {
        match self {
            CapLevel::Near => "NEAR",
            CapLevel::Hit => "HIT",
        }
    }
}

/// Sampled viewpoint at or above the warn threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapSample {
    pub sample: ViewpointSample,
    pub usage: f32,
    pub level: CapLevel,
}

impl fmt::Display for CapSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid={} vp={} kept={} cap={} usage={:.2} trimmed={} [{}]",
            self.sample.connection_id,
            self.sample.viewpoint,
            self.sample.kept,
            self.sample.cap,
            self.usage,
            self.sample.trimmed,
            self.level.tag()
        )
    }
}

/// Aggregate cap usage for one pass
#[derive(Debug, Clone, PartialEq)]
pub struct CapReport {
    pub viewpoints: usize,
    pub avg_kept: f32,
    pub avg_cap: f32,
    /// Total kept / total cap across viewpoints
    pub usage: f32,
    pub frame_bucket: LoadBucket,
    pub frame_ms: f32,
    pub samples: Vec<CapSample>,
}

impl CapReport {
    pub fn near_count(&self) -> usize {
        self.samples.iter().filter(|s| s.level == CapLevel::Near).count()
    }

    pub fn hit_count(&self) -> usize {
        self.samples.iter().filter(|s| s.level == CapLevel::Hit).count()
    }
}

impl fmt::Display for CapReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[AOI Cap] viewpoints={} avgKept={:.1} avgCap={:.1} usage={:.2} frameBucket={} dtMs={:.1}",
            self.viewpoints,
            self.avg_kept,
            self.avg_cap,
            self.usage,
            self.frame_bucket.index(),
            self.frame_ms
        )?;
        if !self.samples.is_empty() {
            f.write_str(" | samples: ")?;
            for (i, sample) in self.samples.iter().enumerate() {
                if i > 0 {
                    f.write_str("; ")?;
                }
                write!(f, "{}", sample)?;
            }
        }
        Ok(())
    }
}

/// Destination for cap reports
pub trait TelemetrySink: Send {
    fn emit(&mut self, report: &CapReport) -> Result<(), TelemetryError>;
}

/// Writes reports to the `tracing` log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&mut self, report: &CapReport) -> Result<(), TelemetryError> {
        info!("{}", report);
        Ok(())
    }
}

/// Collects per-viewpoint samples during a pass and emits rate-limited reports
pub struct CapTelemetry {
    enabled: bool,
    warn_threshold: f32,
    hit_threshold: f32,
    sample_limit: usize,
    min_interval: Duration,
    last_emit: Option<Instant>,
    /// Whether the current pass will produce a report
    reporting: bool,
    viewpoints: usize,
    sum_kept: usize,
    sum_cap: usize,
    samples: Vec<CapSample>,
    sinks: Vec<Box<dyn TelemetrySink>>,
    last_report: Option<CapReport>,
    sink_failures: u64,
}

impl CapTelemetry {
    /// Telemetry with no sinks; reports are still built and kept as `last_report`
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            enabled: config.cap_debug_enabled,
            warn_threshold: config.cap_warn_threshold,
            hit_threshold: config.cap_hit_threshold,
            sample_limit: config.cap_debug_sample_players,
            min_interval: config.cap_debug_min_interval(),
            last_emit: None,
            reporting: false,
            viewpoints: 0,
            sum_kept: 0,
            sum_cap: 0,
            samples: Vec::with_capacity(config.cap_debug_sample_players.min(SAMPLE_INITIAL_CAPACITY)),
            sinks: Vec::new(),
            last_report: None,
            sink_failures: 0,
        }
    }

    /// Apply new thresholds; the rate limiter keeps its history
    pub fn reconfigure(&mut self, config: &ResolverConfig) {
        self.enabled = config.cap_debug_enabled;
        self.warn_threshold = config.cap_warn_threshold;
        self.hit_threshold = config.cap_hit_threshold;
        self.sample_limit = config.cap_debug_sample_players;
        self.min_interval = config.cap_debug_min_interval();
    }

    pub fn add_sink(&mut self, sink: impl TelemetrySink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    /// Start collecting for a new pass
    pub fn begin_pass(&mut self, now: Instant) {
        self.reporting = self.enabled
            && self
                .last_emit
                .map_or(true, |last| now.saturating_duration_since(last) >= self.min_interval);
        self.viewpoints = 0;
        self.sum_kept = 0;
        self.sum_cap = 0;
        self.samples.clear();
    }

    /// Whether the current pass will produce a report
    pub fn is_reporting(&self) -> bool {
        self.reporting
    }

    /// Record one viewpoint's outcome
    pub fn record(&mut self, sample: ViewpointSample) {
        self.viewpoints += 1;
        self.sum_kept = self.sum_kept.saturating_add(sample.kept);
        self.sum_cap = self.sum_cap.saturating_add(sample.cap);

        if !self.reporting || sample.cap == 0 || self.samples.len() >= self.sample_limit {
            return;
        }

        let usage = sample.usage();
        if usage >= self.warn_threshold {
            let level = if usage >= self.hit_threshold {
                CapLevel::Hit
            } else {
                CapLevel::Near
            };
            self.samples.push(CapSample { sample, usage, level });
        }
    }

    /// Close the pass; returns the report if one was emitted
    pub fn finish_pass(
        &mut self,
        frame_bucket: LoadBucket,
        frame_ms: f32,
        now: Instant,
    ) -> Option<&CapReport> {
        if !self.reporting || self.viewpoints == 0 {
            return None;
        }
        self.reporting = false;

        let count = self.viewpoints as f32;
        let report = CapReport {
            viewpoints: self.viewpoints,
            avg_kept: self.sum_kept as f32 / count,
            avg_cap: self.sum_cap as f32 / count,
            usage: if self.sum_cap > 0 {
                self.sum_kept as f32 / self.sum_cap as f32
            } else {
                0.0
            },
            frame_bucket,
            frame_ms,
            samples: std::mem::take(&mut self.samples),
        };

        for sink in &mut self.sinks {
            if let Err(e) = sink.emit(&report) {
                self.sink_failures += 1;
                debug!("Dropping cap report: {}", e);
            }
        }

        self.last_emit = Some(now);
        self.last_report = Some(report);
        self.last_report.as_ref()
    }

    pub fn last_report(&self) -> Option<&CapReport> {
        self.last_report.as_ref()
    }

    /// Number of sink errors swallowed so far
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures
    }
}
