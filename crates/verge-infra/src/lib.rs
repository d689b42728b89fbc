//! # Verge Infrastructure
//!
//! Concrete implementations of the ports defined in `verge-core`:
//! the Redis-backed distributed window store, the in-process fallback
//! counter, the degradation manager that routes between them, and the
//! in-memory decision metrics.
//!
//! ## Feature Flags
//!
//! - `full` (default) - all features enabled
//! - `minimal` - in-process counting only, no shared store
//! - `redis` - Redis-backed distributed counter store

pub mod metrics;
pub mod rate_limit;

pub use metrics::{InMemoryMetrics, MetricsConfig};
pub use rate_limit::{
    DegradationManager, DegradationState, FailurePolicy, HealthConfig, LocalCounterConfig,
    LocalCounterStore,
};

#[cfg(feature = "redis")]
pub use rate_limit::{RedisConfig, RedisCounterConfig, RedisCounterStore};
