//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use verge_core::domain::{Quota, TierQuotas};
use verge_core::error::ConfigError;
use verge_core::resolver::EndpointRule;
use verge_infra::{FailurePolicy, HealthConfig, LocalCounterConfig, MetricsConfig};

#[cfg(feature = "redis")]
use verge_infra::RedisCounterConfig;

/// Which response header set advertises quota state. The two are mutually
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    /// `X-RateLimit-*`, reset as epoch seconds.
    XRateLimit,
    /// draft-7 `RateLimit-*`, reset as delta seconds.
    Draft7,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub header_style: HeaderStyle,
    pub tiers: TierQuotas,
    pub overrides: Vec<EndpointRule>,
    pub fallback_enabled: bool,
    pub fallback: LocalCounterConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
    #[cfg(feature = "redis")]
    pub redis: RedisCounterConfig,
}

impl AppConfig {
    /// Load configuration from environment variables. Malformed quota or
    /// override tables are rejected here, at startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = TierQuotas::default();
        let tiers = TierQuotas {
            free: Self::parse_tier("FREE", defaults.free)?,
            pro: Self::parse_tier("PRO", defaults.pro)?,
            enterprise: Self::parse_tier("ENTERPRISE", defaults.enterprise)?,
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            header_style: Self::parse_header_style()?,
            tiers,
            overrides: Self::parse_overrides()?,
            fallback_enabled: env::var("RATE_LIMIT_FALLBACK_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            fallback: LocalCounterConfig::from_env(),
            health: Self::parse_health()?,
            metrics: MetricsConfig::from_env(),
            #[cfg(feature = "redis")]
            redis: RedisCounterConfig::from_env(),
        })
    }

    /// Format: RATE_LIMIT_TIER_<NAME>=<window_ms>,<max_requests>
    /// Example: RATE_LIMIT_TIER_FREE=60000,30
    fn parse_tier(name: &str, default: Quota) -> Result<Quota, ConfigError> {
        let scope = format!("tier.{}", name.to_lowercase());
        match env::var(format!("RATE_LIMIT_TIER_{name}")) {
            Ok(raw) => {
                let (window_ms, max_requests) = Self::parse_quota_pair(&scope, &raw)?;
                Quota::new(&scope, window_ms, max_requests)
            }
            Err(_) => Ok(default),
        }
    }

    /// Parse endpoint overrides from environment.
    /// Format: RATE_LIMIT_OVERRIDE_<NAME>=<METHOD> <pattern>,<window_ms>,<max_requests>
    /// Example: RATE_LIMIT_OVERRIDE_RENDER=POST /api/render/*,10000,5
    fn parse_overrides() -> Result<Vec<EndpointRule>, ConfigError> {
        // Sorted by name so rule precedence does not depend on the
        // process environment's iteration order.
        let mut raw: Vec<(String, String)> = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix("RATE_LIMIT_OVERRIDE_")
                    .map(|name| (name.to_lowercase(), value))
            })
            .collect();
        raw.sort();

        let mut overrides = Vec::with_capacity(raw.len());
        for (name, value) in raw {
            let (route, window_ms, max_requests) =
                Self::split_override(&name, &value)?;
            let mut route_parts = route.splitn(2, char::is_whitespace);
            let method = route_parts.next().unwrap_or_default();
            let pattern = route_parts.next().ok_or_else(|| ConfigError::InvalidOverride {
                name: name.clone(),
                reason: format!("expected '<METHOD> <pattern>', got '{route}'"),
            })?;

            let quota = Quota::new(&format!("override.{name}"), window_ms, max_requests)?;
            overrides.push(EndpointRule::new(&name, method, pattern.trim(), quota)?);
        }
        Ok(overrides)
    }

    fn split_override(name: &str, value: &str) -> Result<(String, u64, u32), ConfigError> {
        let parts: Vec<&str> = value.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(ConfigError::InvalidOverride {
                name: name.to_string(),
                reason: format!(
                    "expected '<METHOD> <pattern>,<window_ms>,<max_requests>', got '{value}'"
                ),
            });
        }

        let window_ms = parts[1].parse().map_err(|_| ConfigError::InvalidOverride {
            name: name.to_string(),
            reason: format!("window_ms '{}' is not an integer", parts[1]),
        })?;
        let max_requests = parts[2].parse().map_err(|_| ConfigError::InvalidOverride {
            name: name.to_string(),
            reason: format!("max_requests '{}' is not an integer", parts[2]),
        })?;
        Ok((parts[0].to_string(), window_ms, max_requests))
    }

    fn parse_quota_pair(scope: &str, raw: &str) -> Result<(u64, u32), ConfigError> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(ConfigError::InvalidQuota {
                scope: scope.to_string(),
                reason: format!("expected '<window_ms>,<max_requests>', got '{raw}'"),
            });
        }

        let window_ms = parts[0].parse().map_err(|_| ConfigError::InvalidQuota {
            scope: scope.to_string(),
            reason: format!("window_ms '{}' is not an integer", parts[0]),
        })?;
        let max_requests = parts[1].parse().map_err(|_| ConfigError::InvalidQuota {
            scope: scope.to_string(),
            reason: format!("max_requests '{}' is not an integer", parts[1]),
        })?;
        Ok((window_ms, max_requests))
    }

    fn parse_header_style() -> Result<HeaderStyle, ConfigError> {
        match env::var("RATE_LIMIT_HEADER_STYLE") {
            Err(_) => Ok(HeaderStyle::XRateLimit),
            Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "x-ratelimit" => Ok(HeaderStyle::XRateLimit),
                "draft7" => Ok(HeaderStyle::Draft7),
                other => Err(ConfigError::InvalidValue {
                    key: "RATE_LIMIT_HEADER_STYLE".to_string(),
                    reason: format!("'{other}' is not 'x-ratelimit' or 'draft7'"),
                }),
            },
        }
    }

    fn parse_health() -> Result<HealthConfig, ConfigError> {
        let defaults = HealthConfig::default();

        let failure_policy = match env::var("RATE_LIMIT_FAILURE_POLICY") {
            Err(_) => defaults.failure_policy,
            Ok(raw) => raw
                .parse::<FailurePolicy>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "RATE_LIMIT_FAILURE_POLICY".to_string(),
                    reason: e.to_string(),
                })?,
        };

        Ok(HealthConfig {
            op_timeout: Duration::from_millis(
                env::var("RATE_LIMIT_OP_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.op_timeout.as_millis() as u64),
            ),
            probe_interval: Duration::from_secs(
                env::var("RATE_LIMIT_PROBE_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.probe_interval.as_secs()),
            ),
            failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_value_splits_into_route_and_quota() {
        let (route, window_ms, max) =
            AppConfig::split_override("render", "POST /api/render/*,10000,5").unwrap();
        assert_eq!(route, "POST /api/render/*");
        assert_eq!(window_ms, 10_000);
        assert_eq!(max, 5);

        assert!(AppConfig::split_override("render", "POST /api/render/*").is_err());
        assert!(AppConfig::split_override("render", "POST /x,abc,5").is_err());
    }

    #[test]
    fn quota_pair_rejects_malformed_values() {
        assert_eq!(
            AppConfig::parse_quota_pair("tier.free", "60000, 30").unwrap(),
            (60_000, 30)
        );
        assert!(AppConfig::parse_quota_pair("tier.free", "60000").is_err());
        assert!(AppConfig::parse_quota_pair("tier.free", "sixty,30").is_err());
    }
}
