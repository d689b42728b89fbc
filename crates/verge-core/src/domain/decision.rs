//! Admission decisions.

/// Result of one admission check, computed fresh per request and never
/// cached or reused.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    /// Quota numbers for header emission. `None` only for unlimited
    /// policies, which have no finite limit to advertise.
    pub quota: Option<DecisionQuota>,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionQuota {
    pub limit: u32,
    pub remaining: u32,
    /// Approximate instant the oldest in-window entry expires.
    pub reset_at_ms: u64,
}

impl Decision {
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            quota: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.quota.map(|q| q.remaining).unwrap_or(u32::MAX)
    }
}

impl DecisionQuota {
    /// Seconds until the window frees capacity, rounded up, at least 1.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        let delta_ms = self.reset_at_ms.saturating_sub(now_ms);
        delta_ms.div_ceil(1000).max(1)
    }

    /// Reset instant as epoch seconds, for `X-RateLimit-Reset`.
    pub fn reset_epoch_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_rounds_up_and_never_hits_zero() {
        let quota = DecisionQuota {
            limit: 5,
            remaining: 0,
            reset_at_ms: 60_000,
        };
        // 59.9s away rounds to 60.
        assert_eq!(quota.retry_after_secs(100), 60);
        // Already past the reset instant still advises a 1s backoff.
        assert_eq!(quota.retry_after_secs(61_000), 1);
    }
}
