//! Domain-level error types.

use thiserror::Error;

/// Configuration errors - fatal at startup, never raised per request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid quota for {scope}: {reason}")]
    InvalidQuota { scope: String, reason: String },

    #[error("Invalid endpoint override {name}: {reason}")]
    InvalidOverride { name: String, reason: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
