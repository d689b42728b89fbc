//! Backend health tracking and degradation routing.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use verge_core::limiter::epoch_ms;
use verge_core::ports::{CounterStore, StoreError, WindowReservation};

/// What to do when degraded and the fallback counter is disabled.
///
/// `AllowOpen` preserves availability at the cost of unmetered traffic
/// during an outage; `DenyClosed` does the opposite. The trade-off is the
/// operator's to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    AllowOpen,
    DenyClosed,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown failure policy '{0}', expected 'allow-open' or 'deny-closed'")]
pub struct ParseFailurePolicyError(String);

impl FromStr for FailurePolicy {
    type Err = ParseFailurePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow-open" => Ok(Self::AllowOpen),
            "deny-closed" => Ok(Self::DenyClosed),
            other => Err(ParseFailurePolicyError(other.to_string())),
        }
    }
}

/// Process-wide backend health, read by every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationState {
    Healthy,
    Degraded { since_ms: u64 },
}

/// Health manager configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Bound on each primary-store call. Past it the call is cancelled at
    /// the I/O layer and treated as a backend failure.
    pub op_timeout: Duration,
    /// Probe cadence; the scheduler owns the actual timer.
    pub probe_interval: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(250),
            probe_interval: Duration::from_secs(5),
            failure_policy: FailurePolicy::AllowOpen,
        }
    }
}

/// Routes window operations to the primary (distributed) store while
/// healthy and to the local fallback while degraded.
///
/// A request-path failure flips to degraded immediately and the same call
/// is served by the fallback; it is never blocked on the outage. Recovery
/// requires a successful probe, not merely one successful request, so a
/// flapping backend cannot bounce the route on transient errors.
pub struct DegradationManager {
    primary: Arc<dyn CounterStore>,
    fallback: Option<Arc<dyn CounterStore>>,
    /// 0 = healthy, otherwise degraded-since epoch millis. The single
    /// mutable cell shared across the request path; every decision takes
    /// one consistent snapshot.
    degraded_since_ms: AtomicU64,
    config: HealthConfig,
}

impl DegradationManager {
    pub fn new(
        primary: Arc<dyn CounterStore>,
        fallback: Option<Arc<dyn CounterStore>>,
        config: HealthConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            degraded_since_ms: AtomicU64::new(0),
            config,
        }
    }

    pub fn state(&self) -> DegradationState {
        match self.degraded_since_ms.load(Ordering::SeqCst) {
            0 => DegradationState::Healthy,
            since_ms => DegradationState::Degraded { since_ms },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.state(), DegradationState::Degraded { .. })
    }

    pub fn probe_interval(&self) -> Duration {
        self.config.probe_interval
    }

    /// Periodic reachability probe, independent of request traffic. The
    /// only path back to `Healthy`.
    pub async fn probe(&self) {
        // Probes run off the request path and may pay connection setup,
        // so they get more headroom than a request-path call.
        let timeout = self.config.op_timeout.saturating_mul(4);
        match tokio::time::timeout(timeout, self.primary.ping()).await {
            Ok(Ok(())) => {
                if self.degraded_since_ms.swap(0, Ordering::SeqCst) != 0 {
                    tracing::info!("Counter store probe succeeded; resuming distributed mode");
                }
            }
            Ok(Err(err)) => self.mark_degraded(&err.to_string()),
            Err(_) => self.mark_degraded("probe timed out"),
        }
    }

    fn mark_degraded(&self, reason: &str) {
        let since = epoch_ms().max(1);
        // Only the first failure records the transition.
        if self
            .degraded_since_ms
            .compare_exchange(0, since, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::warn!(reason, "Counter store unavailable; entering degraded mode");
        }
    }

    async fn degraded_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        max_requests: u32,
    ) -> Result<WindowReservation, StoreError> {
        if let Some(fallback) = &self.fallback {
            return fallback.try_acquire(key, now_ms, window_ms, max_requests).await;
        }

        match self.config.failure_policy {
            FailurePolicy::AllowOpen => {
                tracing::warn!(key, "Degraded with fallback disabled; allowing open");
                Ok(WindowReservation {
                    admitted: true,
                    // Full count so the synthetic decision reports zero
                    // remaining budget rather than a fresh window.
                    count: max_requests,
                    oldest_ms: None,
                })
            }
            FailurePolicy::DenyClosed => Ok(WindowReservation {
                admitted: false,
                count: max_requests,
                oldest_ms: None,
            }),
        }
    }
}

#[async_trait]
impl CounterStore for DegradationManager {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        max_requests: u32,
    ) -> Result<WindowReservation, StoreError> {
        if self.is_degraded() {
            return self.degraded_acquire(key, now_ms, window_ms, max_requests).await;
        }

        let primary = self
            .primary
            .try_acquire(key, now_ms, window_ms, max_requests);
        match tokio::time::timeout(self.config.op_timeout, primary).await {
            Ok(Ok(reservation)) => Ok(reservation),
            Ok(Err(err)) => {
                // Fail fast: flip the route and serve this call locally.
                self.mark_degraded(&err.to_string());
                self.degraded_acquire(key, now_ms, window_ms, max_requests).await
            }
            Err(_) => {
                self.mark_degraded("operation timed out");
                self.degraded_acquire(key, now_ms, window_ms, max_requests).await
            }
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.primary.ping().await
    }
}
