//! HTTP surface of the rootcause daemon: submit an investigation, poll its
//! status, list monitored resources.

pub mod api_error;
pub mod http_api;
