//! # Verge Shared
//!
//! Wire types shared between the API server and its clients: response
//! envelopes and the rate-limit DTOs.

pub mod dto;
pub mod response;

pub use response::ApiResponse;
