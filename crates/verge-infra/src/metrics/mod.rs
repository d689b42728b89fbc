//! In-memory decision metrics.
//!
//! A fixed-capacity ring of decision records with independent age-based
//! eviction. Recording is fire-and-forget: the request path takes one
//! short lock and can neither block nor fail on observability.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use verge_core::limiter::epoch_ms;
use verge_core::ports::{MetricRecord, MetricsRecorder};

/// Metrics retention configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Hard cap on buffered records; the oldest fall off first.
    pub capacity: usize,
    /// Age bound enforced by the background sweep.
    pub retention: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl MetricsConfig {
    pub fn from_env() -> Self {
        Self {
            capacity: std::env::var("METRICS_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100_000),
            retention: Duration::from_secs(
                std::env::var("METRICS_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(24 * 60 * 60),
            ),
        }
    }
}

/// Bounded in-process decision log.
pub struct InMemoryMetrics {
    records: Mutex<VecDeque<MetricRecord>>,
    config: MetricsConfig,
}

impl InMemoryMetrics {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(MetricsConfig::from_env())
    }

    pub fn recorded(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Evict records older than the retention bound. Runs from the
    /// background sweep, never from the request path. Returns how many
    /// records were dropped.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(self.config.retention.as_millis() as u64);
        let Ok(mut records) = self.records.lock() else {
            return 0;
        };

        let mut dropped = 0;
        while records.front().is_some_and(|r| r.timestamp_ms < cutoff) {
            records.pop_front();
            dropped += 1;
        }
        dropped
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record(&self, record: MetricRecord) {
        // A poisoned lock means a panicking writer elsewhere; the request
        // path just drops the record and moves on.
        let Ok(mut records) = self.records.lock() else {
            return;
        };

        records.push_back(record);
        while records.len() > self.config.capacity {
            records.pop_front();
        }
    }

    fn denied_count(&self, identifier: &str, window: Duration) -> u64 {
        let cutoff = epoch_ms().saturating_sub(window.as_millis() as u64);
        let Ok(records) = self.records.lock() else {
            return 0;
        };

        records
            .iter()
            .rev()
            .take_while(|r| r.timestamp_ms >= cutoff)
            .filter(|r| !r.allowed && r.identifier == identifier)
            .count() as u64
    }

    fn denied_by_identifier(&self, window: Duration) -> Vec<(String, u64)> {
        let cutoff = epoch_ms().saturating_sub(window.as_millis() as u64);
        let Ok(records) = self.records.lock() else {
            return Vec::new();
        };

        let mut counts: HashMap<&str, u64> = HashMap::new();
        for record in records.iter().rev().take_while(|r| r.timestamp_ms >= cutoff) {
            if !record.allowed {
                *counts.entry(record.identifier.as_str()).or_default() += 1;
            }
        }

        let mut aggregates: Vec<(String, u64)> = counts
            .into_iter()
            .map(|(id, n)| (id.to_string(), n))
            .collect();
        aggregates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        aggregates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verge_core::domain::Tier;

    fn record(identifier: &str, allowed: bool, timestamp_ms: u64) -> MetricRecord {
        MetricRecord {
            identifier: identifier.to_string(),
            tier: Tier::Free,
            endpoint: "GET /api/render".to_string(),
            allowed,
            remaining: 0,
            timestamp_ms,
        }
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let metrics = InMemoryMetrics::new(MetricsConfig {
            capacity: 3,
            retention: Duration::from_secs(3_600),
        });

        for i in 0..5 {
            metrics.record(record("ip:10.0.0.1", true, i));
        }
        assert_eq!(metrics.recorded(), 3);
    }

    #[test]
    fn counts_denials_per_identifier_in_window() {
        let metrics = InMemoryMetrics::new(MetricsConfig::default());
        let now = epoch_ms();

        metrics.record(record("ip:10.0.0.1", false, now - 10));
        metrics.record(record("ip:10.0.0.1", false, now - 5));
        metrics.record(record("ip:10.0.0.1", true, now - 3));
        metrics.record(record("ip:10.0.0.2", false, now - 2));

        assert_eq!(metrics.denied_count("ip:10.0.0.1", Duration::from_secs(60)), 2);
        assert_eq!(metrics.denied_count("ip:10.0.0.2", Duration::from_secs(60)), 1);
        assert_eq!(metrics.denied_count("ip:10.0.0.3", Duration::from_secs(60)), 0);

        let aggregates = metrics.denied_by_identifier(Duration::from_secs(60));
        assert_eq!(aggregates[0], ("ip:10.0.0.1".to_string(), 2));
        assert_eq!(aggregates[1], ("ip:10.0.0.2".to_string(), 1));
    }

    #[test]
    fn old_records_fall_outside_the_query_window() {
        let metrics = InMemoryMetrics::new(MetricsConfig::default());
        let now = epoch_ms();

        metrics.record(record("ip:10.0.0.1", false, now - 120_000));
        metrics.record(record("ip:10.0.0.1", false, now - 1));

        assert_eq!(metrics.denied_count("ip:10.0.0.1", Duration::from_secs(60)), 1);
    }

    #[test]
    fn sweep_enforces_retention() {
        let metrics = InMemoryMetrics::new(MetricsConfig {
            capacity: 100,
            retention: Duration::from_secs(60),
        });

        metrics.record(record("ip:10.0.0.1", true, 1_000));
        metrics.record(record("ip:10.0.0.1", true, 90_000));

        let dropped = metrics.sweep(100_000);
        assert_eq!(dropped, 1);
        assert_eq!(metrics.recorded(), 1);
    }
}
