//! Counter store port.

use async_trait::async_trait;

/// Outcome of one atomic window operation against a backing store.
#[derive(Debug, Clone, Copy)]
pub struct WindowReservation {
    /// Whether the entry was inserted (request admitted).
    pub admitted: bool,
    /// Entries in the window after the operation, including the new entry
    /// when admitted.
    pub count: u32,
    /// Timestamp of the oldest surviving entry, if any.
    pub oldest_ms: Option<u64>,
}

/// Sliding-window counter backend.
///
/// The whole remove-expired -> count -> conditionally-insert -> set-expiry
/// sequence must execute as one indivisible operation per call. Evaluating
/// "count < limit" and inserting as two round-trips lets N concurrent
/// callers all observe capacity before any insert lands, over-admitting by
/// up to N-1.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Purge entries older than `now_ms - window_ms`, then insert an entry
    /// at `now_ms` iff the surviving count is below `max_requests`,
    /// refreshing the key's expiry.
    ///
    /// `now_ms` comes from the caller so a single timestamp governs the
    /// whole decision.
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        max_requests: u32,
    ) -> Result<WindowReservation, StoreError>;

    /// Cheap reachability probe, independent of request traffic.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Store errors. Timeouts and connection failures are never interpreted as
/// an allow or deny by the algorithm itself; the degradation manager
/// consumes them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
