//! Observability module - request IDs and critical-error alerting.

mod alert;
mod request_id;

pub use alert::{AlertLayer, AlertSender};
pub use request_id::RequestIdMiddleware;
