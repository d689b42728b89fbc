//! # Verge API Server
//!
//! The main entry point for the Actix-web HTTP server. Every request is
//! fronted by the admission middleware; background jobs keep the backend
//! health probe and the eviction sweeps running.

use actix_web::{App, HttpServer, web};
use tracing_actix_web::TracingLogger;

#[cfg(feature = "scheduler")]
mod background;
mod config;
mod handlers;
mod middleware;
mod observability;
mod state;
mod telemetry;

use config::AppConfig;
use middleware::AdmissionMiddleware;
use observability::RequestIdMiddleware;
use state::AppState;
use telemetry::TelemetryConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    telemetry::init_telemetry(&TelemetryConfig::from_env());

    // A malformed policy table is fatal here, never per request.
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "Invalid configuration, refusing to start");
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                err.to_string(),
            ));
        }
    };

    tracing::info!(
        "Starting Verge API Server on {}:{}",
        config.host,
        config.port
    );

    let state = AppState::new(&config).await;

    #[cfg(feature = "scheduler")]
    let _scheduler = background::start_jobs(&state).await;

    let admission = AdmissionMiddleware::new(
        state.limiter.clone(),
        state.resolver.clone(),
        state.metrics.clone(),
        config.header_style,
    );

    let app_state = state.clone();
    HttpServer::new(move || {
        App::new()
            // Outermost-in: request id, access log, admission.
            .wrap(admission.clone())
            .wrap(TracingLogger::default())
            .wrap(RequestIdMiddleware)
            .app_data(web::Data::new(app_state.clone()))
            .configure(handlers::configure_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
