//! Health check endpoint.

use actix_web::{HttpResponse, web};

use verge_shared::ApiResponse;
use verge_shared::dto::HealthResponse;

use crate::state::AppState;

/// Health check endpoint - returns server status and the limiter's
/// current routing mode.
///
/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let limiter_mode = if state.manager.is_degraded() {
        "degraded"
    } else {
        "healthy"
    };

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        limiter_mode: limiter_mode.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    HttpResponse::Ok().json(ApiResponse::ok(response))
}
