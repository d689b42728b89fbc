//! # Verge Core
//!
//! The domain layer of the Verge rate limiter.
//! This crate contains pure admission-control logic with zero infrastructure
//! dependencies: policy types, the policy resolver, the sliding window
//! decision procedure, and the ports that backends must implement.

pub mod domain;
pub mod error;
pub mod limiter;
pub mod ports;
pub mod resolver;

pub use error::ConfigError;
