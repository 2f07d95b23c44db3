//! Harness: evidence retrieval and tool execution for rootcause.
//!
//! This crate sits between the investigation pipeline and the cloud
//! provider's observability APIs. It provides:
//! - SigV4 request signing and an AWS JSON-protocol client
//! - The [`evidence::ObservabilityBackend`] seam plus fail-closed
//!   evidence providers (logs, metrics, audit events)
//! - Declared input schemas and the evidence tools the reasoning oracle
//!   may invoke

pub mod aws;
pub mod evidence;
pub mod schema;
pub mod sigv4;
pub mod tools;
