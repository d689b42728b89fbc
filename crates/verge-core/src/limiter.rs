//! The sliding window decision procedure.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::{Decision, DecisionQuota, Identifier, Limit, Policy, Quota};
use crate::ports::{CounterStore, StoreError};

/// Current wall clock as epoch milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Computes admission decisions against an abstract counter store.
///
/// The store executes the window operation atomically; this type owns only
/// the decision math and the `Admin` short-circuit. It does not know or
/// care whether the store behind it is distributed or local.
pub struct SlidingWindowLimiter {
    store: Arc<dyn CounterStore>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Check one request. Store failures surface as `StoreError`; this
    /// layer never converts them into an allow or a deny.
    pub async fn check(
        &self,
        identifier: &Identifier,
        policy: &Policy,
    ) -> Result<Decision, StoreError> {
        match policy.limit {
            // Unlimited policies never touch the store: O(1), no I/O.
            Limit::Unlimited => Ok(Decision::unlimited()),
            Limit::Bounded(quota) => self.check_bounded(identifier, quota, epoch_ms()).await,
        }
    }

    async fn check_bounded(
        &self,
        identifier: &Identifier,
        quota: Quota,
        now_ms: u64,
    ) -> Result<Decision, StoreError> {
        let window_ms = quota.window_ms();
        let reservation = self
            .store
            .try_acquire(identifier.as_str(), now_ms, window_ms, quota.max_requests)
            .await?;

        // `count` includes the new entry when admitted, so the subtraction
        // already accounts for this request.
        let remaining = if reservation.admitted {
            quota.max_requests.saturating_sub(reservation.count)
        } else {
            0
        };

        let reset_at_ms = reservation
            .oldest_ms
            .map(|oldest| oldest + window_ms)
            .unwrap_or(now_ms + window_ms);

        Ok(Decision {
            allowed: reservation.admitted,
            quota: Some(DecisionQuota {
                limit: quota.max_requests,
                remaining,
                reset_at_ms,
            }),
        })
    }
}
