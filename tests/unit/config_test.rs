//! Tests for configuration validation

use engine_kernel::config::{MeterConfig, ServerConfig, GATE_DISABLED_THRESHOLD};
use engine_kernel::core::ThreadCategory;

#[test]
fn test_server_config_validation() {
    let valid = ServerConfig::default();
    assert!(valid.validate().is_ok());
}

#[test]
fn test_server_config_invalid_concurrency() {
    let invalid = ServerConfig {
        thread_concurrency: 0,
        ..ServerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_server_config_invalid_meter_level() {
    let invalid = ServerConfig {
        initial_meter_level: 1001,
        ..ServerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_server_config_invalid_meter() {
    let mut invalid = ServerConfig::default();
    invalid.meters.insert(
        ThreadCategory::Worker,
        MeterConfig {
            high_water: 5000,
            ..MeterConfig::default()
        },
    );
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("worker"));
}

#[test]
fn test_gate_disabled_threshold() {
    let config = ServerConfig {
        thread_concurrency: GATE_DISABLED_THRESHOLD,
        ..ServerConfig::default()
    };
    assert!(config.gate_disabled());
}

#[test]
fn test_from_json_str_fills_defaults() {
    let json = r#"{
        "thread_concurrency": 16,
        "lock_wait_timeout_secs": 100000000,
        "monitor": { "locks": true },
        "meters": { "utility": { "workers": 4, "high_water": 150 } },
        "master": { "tick_ms": 250 }
    }"#;
    let config = ServerConfig::from_json_str(json).unwrap();
    assert_eq!(config.thread_concurrency, 16);
    assert!(config.lock_wait_timeout().is_none());
    assert!(config.monitor.locks);
    assert!(!config.monitor.standard);

    let utility = config.meter(ThreadCategory::Utility);
    assert_eq!(utility.workers, 4);
    assert_eq!(utility.high_water, 150);
    assert_eq!(utility.low_water, 50);

    assert_eq!(config.master.tick_ms, 250);
    assert_eq!(config.master.ticks_per_round, 10);
    assert_eq!(config.free_tickets_to_enter, 500);
}

#[test]
fn test_from_json_str_rejects_invalid() {
    assert!(ServerConfig::from_json_str(r#"{ "max_threads": 0 }"#).is_err());
    assert!(ServerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_round_trips_through_json() {
    let config = ServerConfig::auto_tuned();
    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(ServerConfig::from_json_str(&json).unwrap(), config);
}
