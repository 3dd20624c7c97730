//! Gateway-local endpoints; gated routes are served by the forwarder

pub mod health;
pub mod metrics;

pub use health::{health_handler, liveness_handler, HealthResponse};
pub use metrics::metrics_handler;
