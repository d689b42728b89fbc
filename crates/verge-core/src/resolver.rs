//! Policy resolution - maps an inbound request to an identifier and the
//! quota policy in force.
//!
//! Resolution is pure and side-effect-free; it never touches the store.

use crate::domain::{Identifier, Limit, Policy, Quota, Tier, TierQuotas};
use crate::error::ConfigError;

/// The request facts resolution needs, extracted by the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Value of the designated API key header, if present.
    pub api_key: Option<&'a str>,
    /// Trusted-proxy-aware client address, if derivable.
    pub client_ip: Option<&'a str>,
    pub method: &'a str,
    pub path: &'a str,
}

/// Outcome of resolution. `identity_missing` marks the synthetic shared
/// identifier so the caller can log the resolution failure.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub identifier: Identifier,
    pub policy: Policy,
    pub identity_missing: bool,
}

/// A per-endpoint quota override keyed by method and path pattern.
#[derive(Debug, Clone)]
pub struct EndpointRule {
    method: String,
    pattern: PathPattern,
    quota: Quota,
}

impl EndpointRule {
    /// `method` is an HTTP verb or `*`.
    pub fn new(name: &str, method: &str, pattern: &str, quota: Quota) -> Result<Self, ConfigError> {
        let method = method.trim();
        if method.is_empty() {
            return Err(ConfigError::InvalidOverride {
                name: name.to_string(),
                reason: "method must be a verb or '*'".to_string(),
            });
        }
        Ok(Self {
            method: method.to_ascii_uppercase(),
            pattern: PathPattern::parse(name, pattern)?,
            quota,
        })
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        (self.method == "*" || self.method.eq_ignore_ascii_case(method))
            && self.pattern.matches(path)
    }
}

/// Path pattern with literal segments, `*` (exactly one segment), and a
/// trailing `**` (any remainder, including none).
#[derive(Debug, Clone)]
struct PathPattern {
    segments: Vec<Segment>,
    trailing_any: bool,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Any,
}

impl PathPattern {
    fn parse(name: &str, pattern: &str) -> Result<Self, ConfigError> {
        if !pattern.starts_with('/') {
            return Err(ConfigError::InvalidOverride {
                name: name.to_string(),
                reason: format!("pattern '{pattern}' must start with '/'"),
            });
        }

        let mut segments = Vec::new();
        let mut trailing_any = false;
        let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        for (i, seg) in raw.iter().enumerate() {
            match *seg {
                "**" => {
                    if i != raw.len() - 1 {
                        return Err(ConfigError::InvalidOverride {
                            name: name.to_string(),
                            reason: "'**' is only valid as the final segment".to_string(),
                        });
                    }
                    trailing_any = true;
                }
                "*" => segments.push(Segment::Any),
                lit => segments.push(Segment::Literal(lit.to_string())),
            }
        }

        Ok(Self {
            segments,
            trailing_any,
        })
    }

    fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if self.trailing_any {
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        self.segments.iter().zip(parts.iter()).all(|(seg, part)| match seg {
            Segment::Literal(lit) => lit == part,
            Segment::Any => true,
        })
    }
}

/// Resolves `(Identifier, Policy)` for each request.
///
/// Order: API key (tier by prefix, identifier by digest), else client IP
/// under `Free`, else the shared synthetic identifier under `Free`. An
/// endpoint override then replaces the tier quota wholesale - window and
/// budget together, never merged. `Admin` keys stay unlimited even on
/// overridden endpoints; the always-allowed guarantee is absolute.
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    tiers: TierQuotas,
    overrides: Vec<EndpointRule>,
}

impl PolicyResolver {
    pub fn new(tiers: TierQuotas, overrides: Vec<EndpointRule>) -> Self {
        Self { tiers, overrides }
    }

    pub fn resolve(&self, ctx: &RequestContext<'_>) -> Resolution {
        let api_key = ctx.api_key.map(str::trim).filter(|k| !k.is_empty());
        let client_ip = ctx.client_ip.map(str::trim).filter(|ip| !ip.is_empty());

        let (identifier, tier, identity_missing) = match (api_key, client_ip) {
            (Some(key), _) => (Identifier::from_api_key(key), Tier::from_api_key(key), false),
            (None, Some(ip)) => (Identifier::from_ip(ip), Tier::Free, false),
            (None, None) => (Identifier::unknown(), Tier::Free, true),
        };

        let mut limit = self.tiers.quota_for(tier);
        if tier != Tier::Admin {
            if let Some(rule) = self
                .overrides
                .iter()
                .find(|r| r.matches(ctx.method, ctx.path))
            {
                limit = Limit::Bounded(rule.quota);
            }
        }

        Resolution {
            identifier,
            policy: Policy { tier, limit },
            identity_missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quota(window_ms: u64, max: u32) -> Quota {
        Quota {
            window: Duration::from_millis(window_ms),
            max_requests: max,
        }
    }

    fn ctx<'a>(
        api_key: Option<&'a str>,
        ip: Option<&'a str>,
        method: &'a str,
        path: &'a str,
    ) -> RequestContext<'a> {
        RequestContext {
            api_key,
            client_ip: ip,
            method,
            path,
        }
    }

    #[test]
    fn api_key_wins_over_ip() {
        let resolver = PolicyResolver::new(TierQuotas::default(), Vec::new());
        let res = resolver.resolve(&ctx(Some("pro_abc"), Some("10.0.0.1"), "GET", "/api/x"));

        assert_eq!(res.policy.tier, Tier::Pro);
        assert!(res.identifier.as_str().starts_with("key:"));
        assert!(!res.identity_missing);
    }

    #[test]
    fn missing_key_falls_back_to_ip_under_free() {
        let resolver = PolicyResolver::new(TierQuotas::default(), Vec::new());
        let res = resolver.resolve(&ctx(None, Some("10.0.0.1"), "GET", "/api/x"));

        assert_eq!(res.policy.tier, Tier::Free);
        assert_eq!(res.identifier.as_str(), "ip:10.0.0.1");
    }

    #[test]
    fn no_identity_pools_into_shared_bucket() {
        let resolver = PolicyResolver::new(TierQuotas::default(), Vec::new());
        let res = resolver.resolve(&ctx(None, None, "GET", "/api/x"));

        assert_eq!(res.identifier.as_str(), "ip:unknown");
        assert_eq!(res.policy.tier, Tier::Free);
        assert!(res.identity_missing);
    }

    #[test]
    fn blank_api_key_is_treated_as_absent() {
        let resolver = PolicyResolver::new(TierQuotas::default(), Vec::new());
        let res = resolver.resolve(&ctx(Some("   "), Some("10.0.0.1"), "GET", "/api/x"));

        assert_eq!(res.identifier.as_str(), "ip:10.0.0.1");
    }

    #[test]
    fn endpoint_override_replaces_tier_quota_wholesale() {
        let strict = quota(10_000, 5);
        let rule = EndpointRule::new("render", "POST", "/api/render/*", strict).unwrap();
        let resolver = PolicyResolver::new(TierQuotas::default(), vec![rule]);

        let res = resolver.resolve(&ctx(None, Some("10.0.0.1"), "POST", "/api/render/4hhb"));
        assert_eq!(res.policy.limit, Limit::Bounded(strict));
        // Identifier is unchanged by the override.
        assert_eq!(res.identifier.as_str(), "ip:10.0.0.1");

        // Different method: tier default applies.
        let res = resolver.resolve(&ctx(None, Some("10.0.0.1"), "GET", "/api/render/4hhb"));
        assert_eq!(
            res.policy.limit,
            Limit::Bounded(TierQuotas::default().free)
        );
    }

    #[test]
    fn override_binds_paying_tiers_but_never_admin() {
        let strict = quota(10_000, 5);
        let rule = EndpointRule::new("render", "*", "/api/render/**", strict).unwrap();
        let resolver = PolicyResolver::new(TierQuotas::default(), vec![rule]);

        let res = resolver.resolve(&ctx(Some("ent_abc"), None, "POST", "/api/render/a/b"));
        assert_eq!(res.policy.limit, Limit::Bounded(strict));

        let res = resolver.resolve(&ctx(Some("admin_abc"), None, "POST", "/api/render/a/b"));
        assert_eq!(res.policy.limit, Limit::Unlimited);
    }

    #[test]
    fn path_patterns_match_by_segment() {
        let p = |pat: &str| PathPattern::parse("t", pat).unwrap();

        assert!(p("/api/render/*").matches("/api/render/4hhb"));
        assert!(!p("/api/render/*").matches("/api/render"));
        assert!(!p("/api/render/*").matches("/api/render/4hhb/atoms"));
        assert!(p("/api/render/**").matches("/api/render"));
        assert!(p("/api/render/**").matches("/api/render/4hhb/atoms"));
        assert!(p("/api/health").matches("/api/health/"));

        assert!(PathPattern::parse("t", "api/render").is_err());
        assert!(PathPattern::parse("t", "/api/**/render").is_err());
    }
}
