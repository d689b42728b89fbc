//! HTTP handlers and route configuration.

mod health;
mod limits;

use actix_web::web;

/// Configure all application routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/limits").route("/status", web::get().to(limits::status)),
            ),
    );
}
