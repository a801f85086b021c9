//! Config Tests
//!
//! These tests verify defaults, the builder, and `validate()`.

use std::fs;
use std::time::Duration;

use docbridge::{BridgeError, Collections, Config, RetryPolicy};
use tempfile::NamedTempFile;

fn valid_config() -> (Config, NamedTempFile) {
    let credentials = NamedTempFile::new().unwrap();
    fs::write(credentials.path(), "token").unwrap();

    let config = Config::builder()
        .project_id("catalog")
        .credentials_path(credentials.path())
        .build();
    (config, credentials)
}

fn assert_invalid(config: &Config, needle: &str) {
    match config.validate() {
        Err(BridgeError::Configuration(msg)) => assert!(msg.contains(needle), "{}", msg),
        other => panic!("expected Configuration error containing '{}', got {:?}", needle, other),
    }
}

#[test]
fn test_defaults() {
    let config = Config::default();

    assert_eq!(config.max_batch_size, 500);
    assert_eq!(config.max_retry_attempts, 3);
    assert_eq!(config.default_query_limit, 100);
    assert_eq!(config.backoff_base, 2);
    assert_eq!(config.backoff_unit, Duration::from_secs(1));
    assert_eq!(config.collections.modules, "modules");
    assert_eq!(config.collections.compatibility, "compatibility_assessments");
    assert_eq!(config.collections.integrations, "integrated_systems");
    assert_eq!(config.read_timeout(), Duration::from_millis(5000));
}

#[test]
fn test_builder_overrides() {
    let collections = Collections {
        modules: "mods".to_string(),
        compatibility: "compat".to_string(),
        integrations: "systems".to_string(),
    };

    let config = Config::builder()
        .project_id("catalog")
        .collections(collections.clone())
        .max_batch_size(50)
        .max_retry_attempts(5)
        .default_query_limit(25)
        .backoff(3, Duration::from_millis(100))
        .endpoint("10.0.0.1:9000")
        .connect_timeout_ms(250)
        .build();

    assert_eq!(config.project_id, "catalog");
    assert_eq!(config.collections, collections);
    assert_eq!(config.max_batch_size, 50);
    assert_eq!(config.default_query_limit, 25);
    assert_eq!(config.endpoint, "10.0.0.1:9000");
    assert_eq!(config.connect_timeout(), Duration::from_millis(250));

    let policy = RetryPolicy::from_config(&config);
    assert_eq!(policy.max_attempts(), 5);
    assert_eq!(policy.delay_for(2), Duration::from_millis(900));
}

#[test]
fn test_valid_config_passes() {
    let (config, _credentials) = valid_config();
    config.validate().unwrap();
}

#[test]
fn test_missing_project_rejected() {
    let (mut config, _credentials) = valid_config();
    config.project_id = "  ".to_string();
    assert_invalid(&config, "DOCBRIDGE_PROJECT_ID");
}

#[test]
fn test_missing_credentials_rejected() {
    let (mut config, _credentials) = valid_config();
    config.credentials_path = "/no/such/key.json".into();
    assert_invalid(&config, "credentials");
}

#[test]
fn test_zero_limits_rejected() {
    let (config, _credentials) = valid_config();

    let mut c = config.clone();
    c.max_batch_size = 0;
    assert_invalid(&c, "max_batch_size");

    let mut c = config.clone();
    c.max_retry_attempts = 0;
    assert_invalid(&c, "max_retry_attempts");

    let mut c = config.clone();
    c.default_query_limit = 0;
    assert_invalid(&c, "default_query_limit");

    let mut c = config;
    c.backoff_base = 0;
    assert_invalid(&c, "backoff_base");
}

#[test]
fn test_zero_timeouts_rejected() {
    let (config, _credentials) = valid_config();

    let mut c = config.clone();
    c.connect_timeout_ms = 0;
    assert_invalid(&c, "connect_timeout_ms");

    let mut c = config.clone();
    c.read_timeout_ms = 0;
    assert_invalid(&c, "read_timeout_ms");

    let mut c = config;
    c.write_timeout_ms = 0;
    assert_invalid(&c, "write_timeout_ms");
}
