//! HTTP glue in front of the render pipeline.

pub mod handlers;

pub use handlers::{config, ApiState, HealthResponse};
