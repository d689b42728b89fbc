//! Quota policies and tier classification.

use std::time::Duration;

use crate::error::ConfigError;

/// Quota tier applied to an identifier unless overridden per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
    Admin,
}

impl Tier {
    /// Tier name for logging and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
            Self::Admin => "admin",
        }
    }

    /// Classify an API key by its prefix.
    ///
    /// Matchers are an ordered list; the first matching prefix wins and
    /// unknown prefixes fall through to `Free`.
    pub fn from_api_key(key: &str) -> Self {
        const MATCHERS: [(&str, Tier); 3] = [
            ("admin_", Tier::Admin),
            ("ent_", Tier::Enterprise),
            ("pro_", Tier::Pro),
        ];

        MATCHERS
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, tier)| *tier)
            .unwrap_or(Tier::Free)
    }
}

/// A bounded request budget over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub window: Duration,
    pub max_requests: u32,
}

impl Quota {
    /// Build a quota, rejecting degenerate values at configuration time.
    pub fn new(scope: &str, window_ms: u64, max_requests: u32) -> Result<Self, ConfigError> {
        if window_ms == 0 {
            return Err(ConfigError::InvalidQuota {
                scope: scope.to_string(),
                reason: "window must be greater than zero".to_string(),
            });
        }
        if max_requests == 0 {
            return Err(ConfigError::InvalidQuota {
                scope: scope.to_string(),
                reason: "max_requests must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            window: Duration::from_millis(window_ms),
            max_requests,
        })
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// The limit carried by a resolved policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Bounded(Quota),
    Unlimited,
}

/// The policy applied to one request: the tier it was classified under and
/// the limit in force after endpoint overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub tier: Tier,
    pub limit: Limit,
}

/// Per-tier quota table. `Admin` is always unlimited and has no entry.
#[derive(Debug, Clone, Copy)]
pub struct TierQuotas {
    pub free: Quota,
    pub pro: Quota,
    pub enterprise: Quota,
}

impl TierQuotas {
    pub fn quota_for(&self, tier: Tier) -> Limit {
        match tier {
            Tier::Free => Limit::Bounded(self.free),
            Tier::Pro => Limit::Bounded(self.pro),
            Tier::Enterprise => Limit::Bounded(self.enterprise),
            Tier::Admin => Limit::Unlimited,
        }
    }
}

impl Default for TierQuotas {
    fn default() -> Self {
        // One-minute windows, widening by tier.
        Self {
            free: Quota {
                window: Duration::from_millis(60_000),
                max_requests: 30,
            },
            pro: Quota {
                window: Duration::from_millis(60_000),
                max_requests: 300,
            },
            enterprise: Quota {
                window: Duration::from_millis(60_000),
                max_requests: 3_000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_key_prefixes_in_order() {
        assert_eq!(Tier::from_api_key("admin_abc123"), Tier::Admin);
        assert_eq!(Tier::from_api_key("ent_abc123"), Tier::Enterprise);
        assert_eq!(Tier::from_api_key("pro_abc123"), Tier::Pro);
        assert_eq!(Tier::from_api_key("sk_live_abc123"), Tier::Free);
        assert_eq!(Tier::from_api_key(""), Tier::Free);
    }

    #[test]
    fn rejects_zero_window_and_zero_budget() {
        assert!(Quota::new("tier.free", 0, 10).is_err());
        assert!(Quota::new("tier.free", 60_000, 0).is_err());
        assert!(Quota::new("tier.free", 60_000, 10).is_ok());
    }

    #[test]
    fn admin_tier_is_unlimited() {
        let quotas = TierQuotas::default();
        assert_eq!(quotas.quota_for(Tier::Admin), Limit::Unlimited);
        assert!(matches!(quotas.quota_for(Tier::Free), Limit::Bounded(_)));
    }
}
