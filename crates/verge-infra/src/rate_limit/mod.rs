//! Counter store implementations and degradation routing.

mod health;
mod local;

pub use health::{
    DegradationManager, DegradationState, FailurePolicy, HealthConfig, ParseFailurePolicyError,
};
pub use local::{LocalCounterConfig, LocalCounterStore};

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisCounterConfig, RedisCounterStore};
