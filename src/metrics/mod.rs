//! Metrics for the check-in service
//!
//! In-process counters, gauges and histograms, rendered as JSON or
//! Prometheus text by the `/metrics` endpoint.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Metrics registry shared through the application state
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    pub async fn add_counter(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().await.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }

        self.counters
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub async fn set_gauge(&self, name: &str, value: u64) {
        if let Some(gauge) = self.gauges.read().await.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }

        self.gauges
            .write()
            .await
            .insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .await
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .await
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record an observation. New histograms pick buckets from the metric name.
    pub async fn observe_histogram(&self, name: &str, value: f64) {
        if let Some(histogram) = self.histograms.read().await.get(name) {
            histogram.observe(value);
            return;
        }

        self.histograms
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::for_metric(name)))
            .observe(value);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let counters: BTreeMap<String, u64> = self
            .counters
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let gauges: BTreeMap<String, u64> = self
            .gauges
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let histograms: BTreeMap<String, serde_json::Value> = self
            .histograms
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }

    /// Prometheus text exposition format
    pub async fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP checkin_uptime_seconds Time since service start\n");
        output.push_str("# TYPE checkin_uptime_seconds gauge\n");
        output.push_str(&format!(
            "checkin_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        for (name, counter) in self.counters.read().await.iter() {
            let name = prometheus_name(name);
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {}\n", counter.load(Ordering::Relaxed)));
        }

        for (name, gauge) in self.gauges.read().await.iter() {
            let name = prometheus_name(name);
            output.push_str(&format!("# TYPE {name} gauge\n"));
            output.push_str(&format!("{name} {}\n", gauge.load(Ordering::Relaxed)));
        }

        for (name, histogram) in self.histograms.read().await.iter() {
            output.push_str(&histogram.to_prometheus(name));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Fixed-bucket histogram
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum scaled by 1000 so it fits an atomic integer
    sum_milli: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_milli: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Latency buckets in seconds
    pub fn latency() -> Self {
        Self::new(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ])
    }

    /// Match confidence buckets, 0 to 100
    pub fn confidence() -> Self {
        Self::new(vec![40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 95.0, 99.0, 100.0])
    }

    /// Small-count buckets (faces per photo)
    pub fn count_buckets() -> Self {
        Self::new(vec![0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0])
    }

    fn for_metric(name: &str) -> Self {
        if name.ends_with("confidence") {
            Self::confidence()
        } else if name.ends_with("_seconds") {
            Self::latency()
        } else {
            Self::count_buckets()
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_milli
            .fetch_add((value.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.buckets.iter().position(|bucket| value <= *bucket) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn sum(&self) -> f64 {
        self.sum_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();

        serde_json::json!({
            "buckets": self.buckets,
            "counts": counts,
            "sum": self.sum(),
            "count": self.count(),
        })
    }

    pub fn to_prometheus(&self, name: &str) -> String {
        let name = prometheus_name(name);
        let mut output = format!("# TYPE {name} histogram\n");

        let mut cumulative = 0u64;
        for (bucket, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            output.push_str(&format!("{name}_bucket{{le=\"{bucket}\"}} {cumulative}\n"));
        }

        output.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {}\n", self.count()));
        output.push_str(&format!("{name}_sum {}\n", self.sum()));
        output.push_str(&format!("{name}_count {}\n", self.count()));
        output
    }
}

/// Predefined metric names
pub mod metric_names {
    // Matching
    pub const FACES_DETECTED: &str = "checkin.faces.detected";
    pub const FACES_MATCHED: &str = "checkin.faces.matched";
    pub const FACES_UNKNOWN: &str = "checkin.faces.unknown";
    pub const MATCH_CONFIDENCE: &str = "checkin.match.confidence";

    // Ledger
    pub const ATTENDANCE_CREATED: &str = "checkin.attendance.created";
    pub const ATTENDANCE_RAISED: &str = "checkin.attendance.confidence_raised";
    pub const ATTENDANCE_UNCHANGED: &str = "checkin.attendance.unchanged";
    pub const ATTENDANCE_WRITE_FAILURES: &str = "checkin.attendance.write_failures";

    // Drivers
    pub const ENROLLMENTS: &str = "checkin.enrollments";
    pub const LIVE_FRAMES: &str = "checkin.live.frames";
    pub const LIVE_FRAME_ERRORS: &str = "checkin.live.frame_errors";
    pub const LIVE_STREAMS_ACTIVE: &str = "checkin.live.streams_active";
    pub const BATCH_PHOTOS: &str = "checkin.batch.photos";
    pub const BATCH_FACES_PER_PHOTO: &str = "checkin.batch.faces_per_photo";

    // Latency histograms
    pub const FRAME_LATENCY: &str = "checkin.live.frame_seconds";
    pub const BATCH_LATENCY: &str = "checkin.batch.process_seconds";
    pub const ENROLL_LATENCY: &str = "checkin.enroll.latency_seconds";

    // Errors
    pub const VALIDATION_ERRORS: &str = "checkin.errors.validation";
    pub const CAPABILITY_ERRORS: &str = "checkin.errors.capability";
    pub const STORE_ERRORS: &str = "checkin.errors.store";
}

/// Time an async operation into a latency histogram
pub async fn timed<F, T>(metrics: &MetricsRegistry, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics
        .observe_histogram(metric_name, start.elapsed().as_secs_f64())
        .await;
    result
}
