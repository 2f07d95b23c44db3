use rc_core::config::{GeneralConfig, LogFormat};
use rc_telemetry::logging;

#[test]
fn init_logging_is_repeatable() {
    // Second call is a no-op once a global subscriber exists.
    logging::init_logging("rootcause-test", "debug");
    logging::init_logging("rootcause-test", "info");

    tracing::info!(key = "value", "human-readable log line");
}

#[test]
fn init_logging_json_after_pretty_is_noop() {
    logging::init_logging_json("rootcause-test-json", "info");
    tracing::info!(key = "value", "json log line");
}

#[test]
fn init_from_config_accepts_both_formats() {
    let mut general = GeneralConfig::default();
    logging::init_from_config(&general);

    general.log_format = LogFormat::Json;
    general.log_level = "warn".into();
    logging::init_from_config(&general);
}
