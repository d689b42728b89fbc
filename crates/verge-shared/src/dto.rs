//! Data Transfer Objects - rate-limit wire types.

use serde::{Deserialize, Serialize};

/// Body of every 429 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitExceededBody {
    pub error: String,
    pub message: String,
    /// Seconds until capacity frees, mirroring the Retry-After header.
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
    pub limit: u32,
    /// Reset instant as epoch seconds.
    pub reset: u64,
}

impl RateLimitExceededBody {
    pub fn new(retry_after: u64, limit: u32, reset: u64) -> Self {
        Self {
            error: "rate_limit_exceeded".to_string(),
            message: format!("Rate limit exceeded. Try again in {retry_after} seconds."),
            retry_after,
            limit,
            reset,
        }
    }
}

/// Operational view of the limiter, served by `GET /api/limits/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsStatusResponse {
    /// `healthy` or `degraded`.
    pub mode: String,
    /// RFC 3339 instant of the degradation transition, when degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_since: Option<String>,
    /// Query window the aggregates cover, in seconds.
    pub window_secs: u64,
    pub denied: Vec<IdentifierDenials>,
}

/// Denied-request aggregate for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierDenials {
    pub identifier: String,
    pub count: u64,
}

/// Liveness payload for `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Limiter routing mode: `healthy` or `degraded`.
    pub limiter_mode: String,
    pub timestamp: String,
}
