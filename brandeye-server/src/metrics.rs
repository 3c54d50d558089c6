use crate::error::Stage;
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
struct DurationStats {
    count: u64,
    total_ms: f64,
}

/// Pipeline counters, mirrored into the `metrics` facade and kept in-process for
/// the `/metrics` endpoint
pub struct Metrics {
    requests_total: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_rejected: AtomicU64,
    in_flight: AtomicU64,
    failures: RwLock<BTreeMap<&'static str, u64>>,
    stage_durations: RwLock<BTreeMap<Stage, DurationStats>>,
    processing: RwLock<DurationStats>,
    worker_wait: RwLock<DurationStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            failures: RwLock::new(BTreeMap::new()),
            stage_durations: RwLock::new(BTreeMap::new()),
            processing: RwLock::new(DurationStats::default()),
            worker_wait: RwLock::new(DurationStats::default()),
        }
    }

    pub fn record_request_started(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("brandeye_requests_total").increment(1);
        gauge!("brandeye_requests_in_flight").set(in_flight as f64);
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.finish();

        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut processing = self.processing.write();
        processing.count += 1;
        processing.total_ms += ms;
        histogram!("brandeye_processing_duration_ms").record(ms);
    }

    /// `stage` is `None` for failures outside any collaborator stage
    pub fn record_failure(&self, stage: Option<Stage>) {
        self.finish();
        let label = stage.map(|s| s.name()).unwrap_or("request");
        *self.failures.write().entry(label).or_insert(0) += 1;
        counter!("brandeye_request_failures_total", "stage" => label).increment(1);
    }

    /// A request turned away before its pipeline started
    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("brandeye_requests_rejected_total").increment(1);
    }

    /// Time a request queued for a pipeline worker
    pub fn record_worker_wait(&self, waited: Duration) {
        let ms = waited.as_secs_f64() * 1000.0;
        let mut stats = self.worker_wait.write();
        stats.count += 1;
        stats.total_ms += ms;
        histogram!("brandeye_worker_wait_ms").record(ms);
    }

    pub fn record_stage(&self, stage: Stage, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut durations = self.stage_durations.write();
        let stats = durations.entry(stage).or_default();
        stats.count += 1;
        stats.total_ms += ms;
        histogram!("brandeye_stage_duration_ms", "stage" => stage.name()).record(ms);
    }

    fn finish(&self) {
        let previous = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        gauge!("brandeye_requests_in_flight").set(previous.saturating_sub(1) as f64);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failures_for(&self, stage: Option<Stage>) -> u64 {
        let label = stage.map(|s| s.name()).unwrap_or("request");
        self.failures.read().get(label).copied().unwrap_or(0)
    }

    /// Prometheus text exposition of the in-process counters
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# HELP brandeye_requests_total Total /process requests");
        let _ = writeln!(out, "# TYPE brandeye_requests_total counter");
        let _ = writeln!(out, "brandeye_requests_total {}", self.requests_total());

        let _ = writeln!(out, "# HELP brandeye_requests_succeeded_total Completed pipeline runs");
        let _ = writeln!(out, "# TYPE brandeye_requests_succeeded_total counter");
        let _ = writeln!(
            out,
            "brandeye_requests_succeeded_total {}",
            self.requests_succeeded.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# HELP brandeye_requests_rejected_total Requests refused while all workers were busy");
        let _ = writeln!(out, "# TYPE brandeye_requests_rejected_total counter");
        let _ = writeln!(
            out,
            "brandeye_requests_rejected_total {}",
            self.requests_rejected.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# HELP brandeye_requests_in_flight Pipeline runs in progress");
        let _ = writeln!(out, "# TYPE brandeye_requests_in_flight gauge");
        let _ = writeln!(out, "brandeye_requests_in_flight {}", self.in_flight.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP brandeye_request_failures_total Failed pipeline runs by stage");
        let _ = writeln!(out, "# TYPE brandeye_request_failures_total counter");
        for (stage, count) in self.failures.read().iter() {
            let _ = writeln!(out, "brandeye_request_failures_total{{stage=\"{}\"}} {}", stage, count);
        }

        let _ = writeln!(out, "# HELP brandeye_stage_duration_ms Time spent per stage");
        let _ = writeln!(out, "# TYPE brandeye_stage_duration_ms summary");
        for (stage, stats) in self.stage_durations.read().iter() {
            let _ = writeln!(out, "brandeye_stage_duration_ms_sum{{stage=\"{}\"}} {:.3}", stage, stats.total_ms);
            let _ = writeln!(out, "brandeye_stage_duration_ms_count{{stage=\"{}\"}} {}", stage, stats.count);
        }

        let worker_wait = *self.worker_wait.read();
        let _ = writeln!(out, "# HELP brandeye_worker_wait_ms Time requests queued for a pipeline worker");
        let _ = writeln!(out, "# TYPE brandeye_worker_wait_ms summary");
        let _ = writeln!(out, "brandeye_worker_wait_ms_sum {:.3}", worker_wait.total_ms);
        let _ = writeln!(out, "brandeye_worker_wait_ms_count {}", worker_wait.count);

        let processing = *self.processing.read();
        let _ = writeln!(out, "# HELP brandeye_processing_duration_ms End-to-end time of completed runs");
        let _ = writeln!(out, "# TYPE brandeye_processing_duration_ms summary");
        let _ = writeln!(out, "brandeye_processing_duration_ms_sum {:.3}", processing.total_ms);
        let _ = writeln!(out, "brandeye_processing_duration_ms_count {}", processing.count);
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.record_request_started();
        metrics.record_request_started();
        metrics.record_success(Duration::from_millis(120));
        metrics.record_failure(Some(Stage::Grouping));

        assert_eq!(metrics.requests_total(), 2);
        assert_eq!(metrics.failures_for(Some(Stage::Grouping)), 1);
        assert_eq!(metrics.failures_for(None), 0);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = Metrics::new();
        metrics.record_request_started();
        metrics.record_stage(Stage::Detection, Duration::from_millis(40));
        metrics.record_worker_wait(Duration::from_millis(5));
        metrics.record_failure(Some(Stage::Visualization));

        let text = metrics.render_prometheus();
        assert!(text.contains("brandeye_requests_total 1"));
        assert!(text.contains("brandeye_request_failures_total{stage=\"visualization\"} 1"));
        assert!(text.contains("brandeye_stage_duration_ms_count{stage=\"detection\"} 1"));
        assert!(text.contains("brandeye_worker_wait_ms_count 1"));
        assert!(text.contains("brandeye_worker_wait_ms_sum 5.000"));
    }

    #[test]
    fn test_in_flight_never_underflows() {
        let metrics = Metrics::new();
        metrics.record_failure(None);
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.failures_for(None), 1);
    }
}
