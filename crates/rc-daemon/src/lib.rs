//! Long-running rootcause service: owns the investigation runner and
//! serves the HTTP API until shut down.

pub mod daemon;
