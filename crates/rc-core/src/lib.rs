//! Shared building blocks for rootcause: configuration, the incident and
//! evidence data model, and the single-slot investigation tracker.

pub mod config;
pub mod investigation;
pub mod types;
