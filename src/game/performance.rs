//! Frame budget monitoring with hysteresis
//!
//! Tracks recent frame cost and converts it into a [`LoadBucket`] that only
//! changes after the new reading has held for the configured hysteresis
//! window. Caps derived from the bucket feed back into frame cost, so a
//! single spike must not flip the bucket.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ConfigError;

/// Rolling window size for frame cost smoothing (~2 seconds at 60Hz)
const FRAME_WINDOW_SAMPLES: usize = 120;

/// Discrete load level, ordered from least to most loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LoadBucket {
    Healthy,
    Moderate,
    Heavy,
}

impl LoadBucket {
    pub const ALL: [LoadBucket; 3] = [LoadBucket::Healthy, LoadBucket::Moderate, LoadBucket::Heavy];

    /// Numeric level (0=Healthy, 2=Heavy) for logs and metrics
    pub fn index(self) -> u8 {
        match self {
            LoadBucket::Healthy => 0,
            LoadBucket::Moderate => 1,
            LoadBucket::Heavy => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LoadBucket::Healthy => "healthy",
            LoadBucket::Moderate => "moderate",
            LoadBucket::Heavy => "heavy",
        }
    }

    /// Raw bucket for a frame time against a target, without hysteresis
    pub fn from_frame_time(frame_ms: f32, target_ms: f32) -> Self {
        if frame_ms <= target_ms {
            LoadBucket::Healthy
        } else if frame_ms <= target_ms * 2.0 {
            LoadBucket::Moderate
        } else {
            LoadBucket::Heavy
        }
    }
}

/// Capacity associated with each bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketCaps {
    pub healthy: usize,
    pub moderate: usize,
    pub heavy: usize,
}

impl BucketCaps {
    pub fn new(healthy: usize, moderate: usize, heavy: usize) -> Self {
        Self {
            healthy,
            moderate,
            heavy,
        }
    }

    #[inline]
    pub fn cap(&self, bucket: LoadBucket) -> usize {
        match bucket {
            LoadBucket::Healthy => self.healthy,
            LoadBucket::Moderate => self.moderate,
            LoadBucket::Heavy => self.heavy,
        }
    }

    pub(crate) fn check_monotonic(&self, kind: &'static str) -> Result<(), ConfigError> {
        if self.healthy >= self.moderate && self.moderate >= self.heavy {
            Ok(())
        } else {
            Err(ConfigError::CapsNotMonotonic {
                kind,
                healthy: self.healthy,
                moderate: self.moderate,
                heavy: self.heavy,
            })
        }
    }
}

/// Converts frame cost into a committed load bucket
pub struct FrameBudgetMonitor {
    /// Frame time considered healthy
    target_frame_ms: f32,
    /// How long a pending bucket must hold before it is committed
    hysteresis: Duration,
    /// Bucket currently used for caps
    committed: LoadBucket,
    /// Most recent raw bucket
    pending: LoadBucket,
    /// When `pending` last changed
    pending_since: Instant,
    /// Frame time seen by the last sample
    last_frame_ms: f32,
    /// Rolling window of recorded frame costs
    frame_durations: VecDeque<Duration>,
    /// Start of the frame currently being timed
    frame_start: Option<Instant>,
}

impl FrameBudgetMonitor {
    pub fn new(target_frame_ms: f32, hysteresis: Duration) -> Self {
        Self::new_at(target_frame_ms, hysteresis, Instant::now())
    }

    /// Create a monitor whose pending bucket starts counting at `now`
    pub fn new_at(target_frame_ms: f32, hysteresis: Duration, now: Instant) -> Self {
        Self {
            target_frame_ms,
            hysteresis,
            committed: LoadBucket::Healthy,
            pending: LoadBucket::Healthy,
            pending_since: now,
            last_frame_ms: 0.0,
            frame_durations: VecDeque::with_capacity(FRAME_WINDOW_SAMPLES),
            frame_start: None,
        }
    }

    /// Change thresholds without disturbing the committed bucket
    pub fn reconfigure(&mut self, target_frame_ms: f32, hysteresis: Duration) {
        self.target_frame_ms = target_frame_ms;
        self.hysteresis = hysteresis;
    }

    /// Return to the initial state: Healthy, nothing recorded
    pub fn reset(&mut self, now: Instant) {
        self.committed = LoadBucket::Healthy;
        self.pending = LoadBucket::Healthy;
        self.pending_since = now;
        self.last_frame_ms = 0.0;
        self.frame_durations.clear();
        self.frame_start = None;
    }

    /// Start timing a frame
    pub fn frame_start(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    /// End timing a frame and record its cost
    pub fn frame_end(&mut self) {
        if let Some(start) = self.frame_start.take() {
            self.record_frame(start.elapsed());
        }
    }

    /// Record a frame cost measured elsewhere
    pub fn record_frame(&mut self, duration: Duration) {
        self.frame_durations.push_back(duration);
        while self.frame_durations.len() > FRAME_WINDOW_SAMPLES {
            self.frame_durations.pop_front();
        }
    }

    /// Average recorded frame cost in ms (0 when nothing recorded)
    pub fn smoothed_frame_ms(&self) -> f32 {
        if self.frame_durations.is_empty() {
            return 0.0;
        }
        let sum: Duration = self.frame_durations.iter().sum();
        (sum / self.frame_durations.len() as u32).as_secs_f32() * 1000.0
    }

    /// Feed a frame time and return the committed bucket
    pub fn sample(&mut self, frame_ms: f32) -> LoadBucket {
        self.sample_at(frame_ms, Instant::now())
    }

    /// Feed a frame time observed at `now` and return the committed bucket
    pub fn sample_at(&mut self, frame_ms: f32, now: Instant) -> LoadBucket {
        self.last_frame_ms = frame_ms;
        let raw = LoadBucket::from_frame_time(frame_ms, self.target_frame_ms);

        if raw != self.pending {
            self.pending = raw;
            self.pending_since = now;
        }
        if self.committed != self.pending
            && now.saturating_duration_since(self.pending_since) >= self.hysteresis
        {
            self.committed = self.pending;
        }

        self.committed
    }

    pub fn bucket(&self) -> LoadBucket {
        self.committed
    }

    pub fn pending_bucket(&self) -> LoadBucket {
        self.pending
    }

    pub fn last_frame_ms(&self) -> f32 {
        self.last_frame_ms
    }

    pub fn target_frame_ms(&self) -> f32 {
        self.target_frame_ms
    }

    /// Get a human-readable status message
    pub fn status_message(&self) -> String {
        format!(
            "{:?} (pending {:?}) - {:.1}ms last, {:.1}ms target",
            self.committed, self.pending, self.last_frame_ms, self.target_frame_ms
        )
    }
}

impl Default for FrameBudgetMonitor {
    fn default() -> Self {
        Self::new(16.7, Duration::from_secs(2))
    }
}
