//! Metrics collection
//!
//! Prometheus-compatible counters, gauges and latency histograms. One
//! registry per server, shared through its state.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        Self {
            buckets: (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect(),
            boundaries: boundaries.to_vec(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value (milliseconds)
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String, name: &str, labels: &str) {
        let sep = if labels.is_empty() { "" } else { "," };
        for (le, count) in self.get_buckets() {
            let le = if le.is_infinite() {
                "+Inf".to_string()
            } else {
                le.to_string()
            };
            let _ = writeln!(out, "{name}_bucket{{{labels}{sep}le=\"{le}\"}} {count}");
        }
        let braces = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{labels}}}")
        };
        let _ = writeln!(out, "{name}_sum{braces} {}", self.sum());
        let _ = writeln!(out, "{name}_count{braces} {}", self.count());
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-endpoint request metrics
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

#[derive(Debug)]
pub struct MetricsRegistry {
    endpoints: Mutex<BTreeMap<String, Arc<EndpointMetrics>>>,

    // write coordination
    pub writes_accepted: Counter,
    pub writes_rejected: Counter,
    pub writes_not_admitted: Counter,
    pub write_latency: Histogram,

    // replica transport
    pub delivery_attempts: Counter,
    pub deliveries_acked: Counter,
    pub deliveries_abandoned: Counter,

    // failure detection
    pub probes_ok: Counter,
    pub probes_failed: Counter,
    pub replicas_alive: Gauge,

    // reconciliation
    pub syncs_served: Counter,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(BTreeMap::new()),
            writes_accepted: Counter::new(),
            writes_rejected: Counter::new(),
            writes_not_admitted: Counter::new(),
            write_latency: Histogram::new(),
            delivery_attempts: Counter::new(),
            deliveries_acked: Counter::new(),
            deliveries_abandoned: Counter::new(),
            probes_ok: Counter::new(),
            probes_failed: Counter::new(),
            replicas_alive: Gauge::new(),
            syncs_served: Counter::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for an endpoint
    pub fn endpoint(&self, path: &str) -> Arc<EndpointMetrics> {
        self.endpoints
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    pub fn record_request(&self, path: &str, duration: Duration, success: bool) {
        let endpoint = self.endpoint(path);
        endpoint.requests_total.inc();
        endpoint.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            endpoint.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render every metric in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 9] = [
            (
                "quorumlog_writes_accepted_total",
                "Writes that reached their quorum",
                &self.writes_accepted,
            ),
            (
                "quorumlog_writes_rejected_total",
                "Writes that missed their quorum",
                &self.writes_rejected,
            ),
            (
                "quorumlog_writes_not_admitted_total",
                "Writes refused by the admission check",
                &self.writes_not_admitted,
            ),
            (
                "quorumlog_delivery_attempts_total",
                "Individual replica delivery attempts",
                &self.delivery_attempts,
            ),
            (
                "quorumlog_deliveries_acked_total",
                "Replica deliveries acknowledged",
                &self.deliveries_acked,
            ),
            (
                "quorumlog_deliveries_abandoned_total",
                "Replica deliveries abandoned at the deadline",
                &self.deliveries_abandoned,
            ),
            ("quorumlog_probes_ok_total", "Liveness probes answered correctly", &self.probes_ok),
            ("quorumlog_probes_failed_total", "Liveness probes that failed", &self.probes_failed),
            ("quorumlog_syncs_served_total", "Log sync requests answered", &self.syncs_served),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", counter.get());
        }

        out.push_str("# HELP quorumlog_replicas_alive Replicas classified healthy or suspected\n");
        out.push_str("# TYPE quorumlog_replicas_alive gauge\n");
        let _ = writeln!(out, "quorumlog_replicas_alive {}", self.replicas_alive.get());

        out.push_str("# HELP quorumlog_uptime_seconds Server uptime in seconds\n");
        out.push_str("# TYPE quorumlog_uptime_seconds gauge\n");
        let _ = writeln!(out, "quorumlog_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP quorumlog_write_duration_ms Write latency in milliseconds\n");
        out.push_str("# TYPE quorumlog_write_duration_ms histogram\n");
        self.write_latency
            .render(&mut out, "quorumlog_write_duration_ms", "");

        let endpoints = self.endpoints.lock();
        out.push_str("# HELP quorumlog_endpoint_requests_total Requests per endpoint\n");
        out.push_str("# TYPE quorumlog_endpoint_requests_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "quorumlog_endpoint_requests_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_total.get()
            );
        }
        out.push_str("# HELP quorumlog_endpoint_errors_total Errors per endpoint\n");
        out.push_str("# TYPE quorumlog_endpoint_errors_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "quorumlog_endpoint_errors_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_error.get()
            );
        }
        out.push_str("# HELP quorumlog_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE quorumlog_request_duration_ms histogram\n");
        for (path, metrics) in endpoints.iter() {
            metrics.latency.render(
                &mut out,
                "quorumlog_request_duration_ms",
                &format!("path=\"{}\"", path),
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
