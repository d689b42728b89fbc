//! Rate-limited entity identifiers.

use std::fmt;
use std::hash::{Hash, Hasher};

/// The key quota is tracked against: `ip:<address>` or `key:<digest>`.
///
/// Derived deterministically per request and never persisted beyond the
/// window. API keys are digested before they become store keys so raw
/// credentials never reach the backend; the digest uses SipHash with fixed
/// keys, which hashes identically on every process instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn from_api_key(key: &str) -> Self {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        Self(format!("key:{:016x}", hasher.finish()))
    }

    pub fn from_ip(addr: &str) -> Self {
        Self(format!("ip:{addr}"))
    }

    /// Shared synthetic identifier for requests with no usable key or IP.
    /// All such requests pool into one bucket under the strictest tier.
    pub fn unknown() -> Self {
        Self("ip:unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_digest_is_stable_and_hides_the_key() {
        let a = Identifier::from_api_key("pro_secret_token");
        let b = Identifier::from_api_key("pro_secret_token");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("key:"));
        assert!(!a.as_str().contains("secret"));
    }

    #[test]
    fn distinct_keys_get_distinct_identifiers() {
        let a = Identifier::from_api_key("pro_aaa");
        let b = Identifier::from_api_key("pro_bbb");
        assert_ne!(a, b);
    }

    #[test]
    fn ip_identifiers_keep_the_address() {
        assert_eq!(Identifier::from_ip("10.0.0.1").as_str(), "ip:10.0.0.1");
        assert_eq!(Identifier::unknown().as_str(), "ip:unknown");
    }
}
