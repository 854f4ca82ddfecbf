//! Quote source request metrics
//!
//! Tracks a rolling latency window and lifetime success counts per source.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples to keep for metrics calculation
const MAX_SAMPLES: usize = 100;

/// Metrics for a single quote source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_name: String,
    /// 50th percentile latency of successful requests in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency of successful requests in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
}

impl SourceMetrics {
    /// Creates metrics with no data
    pub fn empty(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Default)]
struct Counters {
    samples: VecDeque<LatencySample>,
    total: u64,
    failed: u64,
}

/// Collects request outcomes for one source
pub struct MetricsCollector {
    source_name: String,
    counters: RwLock<Counters>,
}

impl MetricsCollector {
    pub fn new(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            counters: RwLock::new(Counters {
                samples: VecDeque::with_capacity(MAX_SAMPLES),
                ..Counters::default()
            }),
        }
    }

    /// Records a request with its duration and success status
    pub async fn record_request(&self, duration: Duration, success: bool) {
        let mut counters = self.counters.write().await;
        counters.total += 1;
        if !success {
            counters.failed += 1;
        }
        if counters.samples.len() >= MAX_SAMPLES {
            counters.samples.pop_front();
        }
        counters.samples.push_back(LatencySample {
            duration_ms: duration.as_secs_f64() * 1000.0,
            success,
        });
    }

    /// Computes current metrics from collected samples
    pub async fn get_metrics(&self) -> SourceMetrics {
        let counters = self.counters.read().await;
        if counters.samples.is_empty() {
            return SourceMetrics::empty(&self.source_name);
        }

        let mut latencies: Vec<f64> = counters
            .samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let success_rate = if counters.total > 0 {
            (counters.total - counters.failed) as f64 / counters.total as f64
        } else {
            1.0
        };

        SourceMetrics {
            source_name: self.source_name.clone(),
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate,
            total_requests: counters.total,
            failed_requests: counters.failed,
        }
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}
