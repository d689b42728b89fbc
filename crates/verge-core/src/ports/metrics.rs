//! Decision metrics port.

use std::time::Duration;

use crate::domain::Tier;

/// One recorded admission decision.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub identifier: String,
    pub tier: Tier,
    pub endpoint: String,
    pub allowed: bool,
    pub remaining: u32,
    pub timestamp_ms: u64,
}

/// Decision recorder - abstraction over metrics backends.
///
/// `record` is fire-and-forget: implementations must never block or fail
/// the request path. Eviction is the implementation's own concern (age or
/// capacity), never the caller's.
pub trait MetricsRecorder: Send + Sync {
    fn record(&self, record: MetricRecord);

    /// Denied requests for one identifier within the trailing window.
    fn denied_count(&self, identifier: &str, window: Duration) -> u64;

    /// Denied requests per identifier within the trailing window, sorted
    /// most-denied first.
    fn denied_by_identifier(&self, window: Duration) -> Vec<(String, u64)>;
}
