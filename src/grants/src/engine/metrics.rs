//! Prometheus-style metrics for enumeration observability

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Enumeration counters and latency summary
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// By-subject enumerations started
    pub by_subject_requests: u64,

    /// By-resource enumerations started
    pub by_resource_requests: u64,

    /// Grants reported across all completed enumerations
    pub grants_reported: u64,

    /// Oracle calls issued
    pub oracle_calls: u64,

    /// (domain, type, action) triples settled by the wildcard probe alone
    pub wildcard_short_circuits: u64,

    /// Enumerations that completed with an empty result
    pub not_found: u64,

    /// Enumerations aborted by an oracle or store failure
    pub oracle_failures: u64,

    /// Enumerations aborted by cancellation
    pub cancellations: u64,

    /// Latency summary (p50, p90, p99)
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    pub fn total_requests(&self) -> u64 {
        self.by_subject_requests + self.by_resource_requests
    }

    /// Average oracle calls per enumeration
    pub fn calls_per_request(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.oracle_calls as f64 / total as f64
        }
    }
}

/// Metrics collector shared by every enumeration of one engine
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    /// Record the start of an enumeration
    pub async fn record_request(&self, by_subject: bool) {
        let mut metrics = self.metrics.write().await;
        if by_subject {
            metrics.by_subject_requests += 1;
        } else {
            metrics.by_resource_requests += 1;
        }
    }

    /// Record the probing work of one finished enumeration
    pub async fn record_probes(&self, oracle_calls: u64, short_circuits: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.oracle_calls += oracle_calls;
        metrics.wildcard_short_circuits += short_circuits;
    }

    /// Record a successful enumeration outcome
    pub async fn record_grants(&self, grants: usize) {
        let mut metrics = self.metrics.write().await;
        metrics.grants_reported += grants as u64;
        if grants == 0 {
            metrics.not_found += 1;
        }
    }

    pub async fn record_oracle_failure(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.oracle_failures += 1;
    }

    pub async fn record_cancellation(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.cancellations += 1;
    }

    /// Record enumeration latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        // Keep only recent samples
        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut metrics = self.metrics.write().await;

        let sum: f64 = samples.iter().sum();
        metrics.avg_latency_ms = sum / samples.len() as f64;

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Get current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Export metrics in Prometheus format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP grants_requests_total Enumeration requests by mode
# TYPE grants_requests_total counter
grants_requests_total{{mode="by_subject"}} {}
grants_requests_total{{mode="by_resource"}} {}

# HELP grants_reported_total Grants reported
# TYPE grants_reported_total counter
grants_reported_total {}

# HELP grants_oracle_calls_total Oracle calls issued
# TYPE grants_oracle_calls_total counter
grants_oracle_calls_total {}

# HELP grants_wildcard_short_circuits_total Triples settled by the wildcard probe
# TYPE grants_wildcard_short_circuits_total counter
grants_wildcard_short_circuits_total {}

# HELP grants_not_found_total Enumerations with an empty result
# TYPE grants_not_found_total counter
grants_not_found_total {}

# HELP grants_failures_total Aborted enumerations by cause
# TYPE grants_failures_total counter
grants_failures_total{{cause="oracle_unavailable"}} {}
grants_failures_total{{cause="cancelled"}} {}

# HELP grants_latency_seconds Enumeration latency percentiles
# TYPE grants_latency_seconds summary
grants_latency_seconds{{quantile="0.5"}} {}
grants_latency_seconds{{quantile="0.9"}} {}
grants_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.by_subject_requests,
            metrics.by_resource_requests,
            metrics.grants_reported,
            metrics.oracle_calls,
            metrics.wildcard_short_circuits,
            metrics.not_found,
            metrics.oracle_failures,
            metrics.cancellations,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
