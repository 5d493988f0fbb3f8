//! HTTP route handlers.

pub mod health;

pub use health::{HealthResponse, TokenHealthResponse, health_routes};
