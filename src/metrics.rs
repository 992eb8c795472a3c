//! Prometheus-compatible metrics endpoint
//!
//! Exposes resolver pass statistics in Prometheus format for Grafana dashboards.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::net::aoi::PassOutcome;
use crate::net::telemetry::{CapReport, TelemetryError, TelemetrySink};

/// Pass durations kept for percentile calculation
const PASS_HISTORY_SAMPLES: usize = 1000;

/// Metrics registry for the interest resolver
#[derive(Debug)]
pub struct Metrics {
    // Pass counters
    pub passes_total: AtomicU64,
    pub passes_skipped_total: AtomicU64,

    // Last completed pass
    pub entities: AtomicU64,
    pub clients_ready: AtomicU64,
    pub viewpoints: AtomicU64,
    pub viewpoints_absent: AtomicU64,
    pub subscriptions_kept: AtomicU64,
    pub subscriptions_cap: AtomicU64,
    pub cap_usage_percent: AtomicU64,

    // Cumulative truncation
    pub trimmed_total: AtomicU64,

    // Frame load (0=Healthy, 1=Moderate, 2=Heavy)
    pub frame_bucket: AtomicU64,
    pub frame_cap: AtomicU64,
    pub frame_time_us: AtomicU64,

    // Pass timing (microseconds)
    pub pass_time_us: AtomicU64,
    pub pass_time_p95_us: AtomicU64,
    pub pass_time_p99_us: AtomicU64,
    pub pass_time_max_us: AtomicU64,

    // Grid shape
    pub grid_cells: AtomicU64,
    pub grid_max_per_cell: AtomicU64,

    // Cap telemetry
    pub cap_reports_total: AtomicU64,
    pub cap_near_total: AtomicU64,
    pub cap_hit_total: AtomicU64,

    start_time: Instant,

    // Rolling pass times for percentile calculation
    pass_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            passes_total: AtomicU64::new(0),
            passes_skipped_total: AtomicU64::new(0),
            entities: AtomicU64::new(0),
            clients_ready: AtomicU64::new(0),
            viewpoints: AtomicU64::new(0),
            viewpoints_absent: AtomicU64::new(0),
            subscriptions_kept: AtomicU64::new(0),
            subscriptions_cap: AtomicU64::new(0),
            cap_usage_percent: AtomicU64::new(0),
            trimmed_total: AtomicU64::new(0),
            frame_bucket: AtomicU64::new(0),
            frame_cap: AtomicU64::new(0),
            frame_time_us: AtomicU64::new(0),
            pass_time_us: AtomicU64::new(0),
            pass_time_p95_us: AtomicU64::new(0),
            pass_time_p99_us: AtomicU64::new(0),
            pass_time_max_us: AtomicU64::new(0),
            grid_cells: AtomicU64::new(0),
            grid_max_per_cell: AtomicU64::new(0),
            cap_reports_total: AtomicU64::new(0),
            cap_near_total: AtomicU64::new(0),
            cap_hit_total: AtomicU64::new(0),
            start_time: Instant::now(),
            pass_history: RwLock::new(VecDeque::with_capacity(PASS_HISTORY_SAMPLES)),
        }
    }

    /// Record the outcome of a resolve pass
    pub fn record_pass(&self, outcome: &PassOutcome) {
        let report = match outcome {
            PassOutcome::Completed(report) => report,
            PassOutcome::Skipped { entities } => {
                self.passes_skipped_total.fetch_add(1, Ordering::Relaxed);
                self.entities.store(*entities as u64, Ordering::Relaxed);
                return;
            }
        };

        self.entities.store(report.entities as u64, Ordering::Relaxed);
        self.clients_ready.store(report.clients as u64, Ordering::Relaxed);
        self.viewpoints.store(report.viewpoints as u64, Ordering::Relaxed);
        self.viewpoints_absent
            .store(report.skipped_viewpoints as u64, Ordering::Relaxed);
        self.subscriptions_kept
            .store(report.total_kept as u64, Ordering::Relaxed);
        self.subscriptions_cap
            .store(report.total_cap as u64, Ordering::Relaxed);
        let usage = if report.total_cap > 0 {
            (report.total_kept as u128 * 100 / report.total_cap as u128) as u64
        } else {
            0
        };
        self.cap_usage_percent.store(usage, Ordering::Relaxed);
        self.trimmed_total
            .fetch_add(report.total_trimmed as u64, Ordering::Relaxed);

        self.frame_bucket
            .store(report.frame_bucket.index() as u64, Ordering::Relaxed);
        self.frame_cap.store(report.frame_cap as u64, Ordering::Relaxed);
        self.frame_time_us
            .store((report.frame_ms * 1000.0) as u64, Ordering::Relaxed);

        self.grid_cells
            .store(report.grid.non_empty_cells as u64, Ordering::Relaxed);
        self.grid_max_per_cell
            .store(report.grid.max_per_cell as u64, Ordering::Relaxed);

        self.record_pass_time(report.elapsed);
    }

    /// Record a pass duration and update percentiles
    pub fn record_pass_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.pass_time_us.store(us, Ordering::Relaxed);
        self.passes_total.fetch_add(1, Ordering::Relaxed);

        let mut history = self.pass_history.write();
        history.push_back(us);
        while history.len() > PASS_HISTORY_SAMPLES {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.pass_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.pass_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.pass_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn frame_bucket_name(&self) -> &'static str {
        match self.frame_bucket.load(Ordering::Relaxed) {
            0 => "healthy",
            1 => "moderate",
            _ => "heavy",
        }
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Pass counters
        metric!("aoi_passes_total", "Completed resolve passes", "counter",
            self.passes_total.load(Ordering::Relaxed));
        metric!("aoi_passes_skipped_total", "Passes skipped on a degenerate snapshot", "counter",
            self.passes_skipped_total.load(Ordering::Relaxed));

        // Snapshot size
        metric!("aoi_entities", "Entities in the last snapshot", "gauge",
            self.entities.load(Ordering::Relaxed));
        metric!("aoi_clients_ready", "Ready clients in the last pass", "gauge",
            self.clients_ready.load(Ordering::Relaxed));
        metric!("aoi_viewpoints", "Viewpoints resolved in the last pass", "gauge",
            self.viewpoints.load(Ordering::Relaxed));
        metric!("aoi_viewpoints_absent", "Viewpoints skipped for lack of a position", "gauge",
            self.viewpoints_absent.load(Ordering::Relaxed));

        // Caps
        metric!("aoi_subscriptions_kept", "Subscriptions published in the last pass", "gauge",
            self.subscriptions_kept.load(Ordering::Relaxed));
        metric!("aoi_subscriptions_cap", "Sum of effective caps in the last pass", "gauge",
            self.subscriptions_cap.load(Ordering::Relaxed));
        metric!("aoi_cap_usage_percent", "Kept / cap across viewpoints", "gauge",
            self.cap_usage_percent.load(Ordering::Relaxed));
        metric!("aoi_trimmed_total", "Candidates dropped by distance truncation", "counter",
            self.trimmed_total.load(Ordering::Relaxed));

        // Frame load
        metric!("aoi_frame_bucket", "Committed frame load bucket (0=Healthy, 2=Heavy)", "gauge",
            self.frame_bucket.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP aoi_frame_state Human-readable frame load bucket\n# TYPE aoi_frame_state gauge\naoi_frame_state{{state=\"{}\"}} 1\n",
            self.frame_bucket_name()
        ));
        metric!("aoi_frame_cap", "Cap derived from frame load", "gauge",
            self.frame_cap.load(Ordering::Relaxed));
        metric!("aoi_frame_time_microseconds", "Smoothed frame time", "gauge",
            self.frame_time_us.load(Ordering::Relaxed));

        // Pass timing
        metric!("aoi_pass_time_microseconds", "Last pass duration", "gauge",
            self.pass_time_us.load(Ordering::Relaxed));
        metric!("aoi_pass_time_p95_microseconds", "95th percentile pass duration", "gauge",
            self.pass_time_p95_us.load(Ordering::Relaxed));
        metric!("aoi_pass_time_p99_microseconds", "99th percentile pass duration", "gauge",
            self.pass_time_p99_us.load(Ordering::Relaxed));
        metric!("aoi_pass_time_max_microseconds", "Maximum pass duration", "gauge",
            self.pass_time_max_us.load(Ordering::Relaxed));

        // Grid
        metric!("aoi_grid_cells", "Non-empty grid cells", "gauge",
            self.grid_cells.load(Ordering::Relaxed));
        metric!("aoi_grid_max_per_cell", "Most entries in a single cell", "gauge",
            self.grid_max_per_cell.load(Ordering::Relaxed));

        // Telemetry
        metric!("aoi_cap_reports_total", "Cap reports emitted", "counter",
            self.cap_reports_total.load(Ordering::Relaxed));
        metric!("aoi_cap_near_total", "Sampled viewpoints near their cap", "counter",
            self.cap_near_total.load(Ordering::Relaxed));
        metric!("aoi_cap_hit_total", "Sampled viewpoints at their cap", "counter",
            self.cap_hit_total.load(Ordering::Relaxed));

        metric!("aoi_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Point-in-time copy of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            passes: PassCounters {
                total: self.passes_total.load(Ordering::Relaxed),
                skipped: self.passes_skipped_total.load(Ordering::Relaxed),
            },
            last_pass: LastPass {
                entities: self.entities.load(Ordering::Relaxed),
                clients_ready: self.clients_ready.load(Ordering::Relaxed),
                viewpoints: self.viewpoints.load(Ordering::Relaxed),
                viewpoints_absent: self.viewpoints_absent.load(Ordering::Relaxed),
                kept: self.subscriptions_kept.load(Ordering::Relaxed),
                cap: self.subscriptions_cap.load(Ordering::Relaxed),
                usage_percent: self.cap_usage_percent.load(Ordering::Relaxed),
                grid_cells: self.grid_cells.load(Ordering::Relaxed),
                grid_max_per_cell: self.grid_max_per_cell.load(Ordering::Relaxed),
            },
            performance: Performance {
                frame_bucket: self.frame_bucket.load(Ordering::Relaxed),
                frame_bucket_name: self.frame_bucket_name(),
                frame_cap: self.frame_cap.load(Ordering::Relaxed),
                frame_time_us: self.frame_time_us.load(Ordering::Relaxed),
                pass_time_us: self.pass_time_us.load(Ordering::Relaxed),
                pass_time_p95_us: self.pass_time_p95_us.load(Ordering::Relaxed),
                pass_time_p99_us: self.pass_time_p99_us.load(Ordering::Relaxed),
                pass_time_max_us: self.pass_time_max_us.load(Ordering::Relaxed),
            },
            caps: CapCounters {
                trimmed: self.trimmed_total.load(Ordering::Relaxed),
                reports: self.cap_reports_total.load(Ordering::Relaxed),
                near: self.cap_near_total.load(Ordering::Relaxed),
                hit: self.cap_hit_total.load(Ordering::Relaxed),
            },
            uptime_seconds: self.uptime_seconds(),
        }
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts NEAR/HIT samples from rate-limited cap reports
impl TelemetrySink for Arc<Metrics> {
    fn emit(&mut self, report: &CapReport) -> Result<(), TelemetryError> {
        self.cap_reports_total.fetch_add(1, Ordering::Relaxed);
        self.cap_near_total
            .fetch_add(report.near_count() as u64, Ordering::Relaxed);
        self.cap_hit_total
            .fetch_add(report.hit_count() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub passes: PassCounters,
    pub last_pass: LastPass,
    pub performance: Performance,
    pub caps: CapCounters,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassCounters {
    pub total: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastPass {
    pub entities: u64,
    pub clients_ready: u64,
    pub viewpoints: u64,
    pub viewpoints_absent: u64,
    pub kept: u64,
    pub cap: u64,
    pub usage_percent: u64,
    pub grid_cells: u64,
    pub grid_max_per_cell: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub frame_bucket: u64,
    pub frame_bucket_name: &'static str,
    pub frame_cap: u64,
    pub frame_time_us: u64,
    pub pass_time_us: u64,
    pub pass_time_p95_us: u64,
    pub pass_time_p99_us: u64,
    pub pass_time_max_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapCounters {
    pub trimmed: u64,
    pub reports: u64,
    pub near: u64,
    pub hit: u64,
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Build the HTTP response for a raw request
fn route(request: &str, metrics: &Metrics) -> String {
    if request.starts_with("GET /metrics/json") {
        http_response("application/json", &metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
    } else if request.starts_with("GET /health") {
        http_response("text/plain", "OK")
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route(&request, &metrics);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
