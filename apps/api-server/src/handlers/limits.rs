//! Operational view of the rate limiter.

use std::time::Duration;

use actix_web::{HttpResponse, web};
use serde::Deserialize;

use verge_core::ports::MetricsRecorder;
use verge_infra::DegradationState;
use verge_shared::ApiResponse;
use verge_shared::dto::{IdentifierDenials, LimitsStatusResponse};

use crate::state::AppState;

const DEFAULT_WINDOW_SECS: u64 = 3_600;
/// Aggregates are for dashboards; cap the response size.
const MAX_IDENTIFIERS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    window_secs: Option<u64>,
}

/// Degradation state and denied-request aggregates.
///
/// GET /api/limits/status?window_secs=3600
pub async fn status(state: web::Data<AppState>, query: web::Query<StatusQuery>) -> HttpResponse {
    let window_secs = query.window_secs.unwrap_or(DEFAULT_WINDOW_SECS);

    let (mode, degraded_since) = match state.manager.state() {
        DegradationState::Healthy => ("healthy", None),
        DegradationState::Degraded { since_ms } => (
            "degraded",
            chrono::DateTime::from_timestamp_millis(since_ms as i64).map(|ts| ts.to_rfc3339()),
        ),
    };

    let denied = state
        .metrics
        .denied_by_identifier(Duration::from_secs(window_secs))
        .into_iter()
        .take(MAX_IDENTIFIERS)
        .map(|(identifier, count)| IdentifierDenials { identifier, count })
        .collect();

    HttpResponse::Ok().json(ApiResponse::ok(LimitsStatusResponse {
        mode: mode.to_string(),
        degraded_since,
        window_secs,
        denied,
    }))
}
