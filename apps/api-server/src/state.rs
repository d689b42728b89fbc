//! Application state - shared across middleware, handlers, and jobs.

use std::sync::Arc;

use verge_core::limiter::SlidingWindowLimiter;
use verge_core::ports::CounterStore;
use verge_core::resolver::PolicyResolver;
use verge_infra::{DegradationManager, InMemoryMetrics, LocalCounterConfig, LocalCounterStore};

#[cfg(feature = "redis")]
use verge_infra::RedisCounterStore;

use crate::config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<SlidingWindowLimiter>,
    pub resolver: Arc<PolicyResolver>,
    pub manager: Arc<DegradationManager>,
    pub metrics: Arc<InMemoryMetrics>,
    /// Present when the fallback counter is enabled; the background sweep
    /// needs a direct handle.
    pub fallback: Option<Arc<LocalCounterStore>>,
}

impl AppState {
    /// Build the application state with appropriate implementations.
    pub async fn new(config: &AppConfig) -> Self {
        let fallback = config
            .fallback_enabled
            .then(|| Arc::new(LocalCounterStore::new(config.fallback.clone())));

        let primary = Self::primary_store(config, fallback.as_ref());

        let manager = Arc::new(DegradationManager::new(
            primary,
            fallback
                .clone()
                .map(|store| store as Arc<dyn CounterStore>),
            config.health.clone(),
        ));

        // One eager probe so an unreachable backend is visible (and the
        // route degraded) before the first request pays the timeout.
        manager.probe().await;

        let limiter = Arc::new(SlidingWindowLimiter::new(
            manager.clone() as Arc<dyn CounterStore>
        ));
        let resolver = Arc::new(PolicyResolver::new(
            config.tiers,
            config.overrides.clone(),
        ));
        let metrics = Arc::new(InMemoryMetrics::new(config.metrics.clone()));

        tracing::info!(
            degraded = manager.is_degraded(),
            fallback_enabled = config.fallback_enabled,
            "Application state initialized"
        );

        Self {
            limiter,
            resolver,
            manager,
            metrics,
            fallback,
        }
    }

    #[cfg(feature = "redis")]
    fn primary_store(
        config: &AppConfig,
        fallback: Option<&Arc<LocalCounterStore>>,
    ) -> Arc<dyn CounterStore> {
        match RedisCounterStore::new(config.redis.clone()) {
            Ok(store) => Arc::new(store),
            Err(err) => {
                tracing::error!(
                    %err,
                    "Invalid Redis configuration. Falling back to in-process counting."
                );
                Self::local_primary(fallback)
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    fn primary_store(
        _config: &AppConfig,
        fallback: Option<&Arc<LocalCounterStore>>,
    ) -> Arc<dyn CounterStore> {
        tracing::info!("Running without redis feature - in-process counting only");
        Self::local_primary(fallback)
    }

    /// In-process primary for builds or configurations without a shared
    /// store. Reuses the fallback instance so both routes see one window.
    fn local_primary(fallback: Option<&Arc<LocalCounterStore>>) -> Arc<dyn CounterStore> {
        match fallback {
            Some(store) => store.clone(),
            None => Arc::new(LocalCounterStore::new(LocalCounterConfig::default())),
        }
    }
}
