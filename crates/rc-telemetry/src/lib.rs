//! Logging and request tracing for rootcause services.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`,
//!   filtered by `RUST_LOG` or the configured level
//! - **Tracing**: request-id middleware for axum and named operation spans

pub mod logging;
pub mod tracing_setup;
