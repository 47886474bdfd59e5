//! Environment-driven configuration
//!
//! These tests mutate process environment variables and run serially.

use serial_test::serial;

use fleetsync_server::config::{Config, ImportConfig, PlatformConfig, DEFAULT_CHUNK_SIZE};

const VARS: &[&str] = &[
    "FLEETSYNC_CHUNK_SIZE",
    "FLEETSYNC_MAX_CONCURRENT_CHUNKS",
    "FLEETSYNC_MAX_FAILURE_RATIO",
    "HEALTH_WINDOW_SIZE",
    "PLATFORM_BASE_URL",
    "PLATFORM_API_TOKEN",
];

fn clear() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_import_config_defaults() {
    clear();
    let config = ImportConfig::from_env().unwrap();
    assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(config.health.window_size, 20);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_import_config_overrides() {
    clear();
    std::env::set_var("FLEETSYNC_CHUNK_SIZE", "200");
    std::env::set_var("FLEETSYNC_MAX_CONCURRENT_CHUNKS", "6");
    std::env::set_var("FLEETSYNC_MAX_FAILURE_RATIO", "0.25");
    std::env::set_var("HEALTH_WINDOW_SIZE", "50");

    let config = ImportConfig::from_env().unwrap();
    assert_eq!(config.chunk_size, 200);
    assert_eq!(config.max_concurrent_chunks, 6);
    assert_eq!(config.max_failure_ratio, 0.25);
    assert_eq!(config.health.window_size, 50);
    clear();
}

#[test]
#[serial]
fn test_malformed_value_is_rejected() {
    clear();
    std::env::set_var("FLEETSYNC_CHUNK_SIZE", "fifty");

    let err = ImportConfig::from_env().unwrap_err();
    assert!(err.is_config());
    assert_eq!(err.to_string(), "Invalid value for FLEETSYNC_CHUNK_SIZE: fifty");
    assert!(Config::load().is_err());
    clear();
}

#[test]
#[serial]
fn test_platform_config_from_env() {
    clear();
    std::env::set_var("PLATFORM_BASE_URL", "https://tracking.example.com");
    std::env::set_var("PLATFORM_API_TOKEN", "");

    let config = PlatformConfig::from_env().unwrap();
    assert_eq!(config.base_url, "https://tracking.example.com");
    assert_eq!(config.api_token, None);
    assert!(config.validate().is_ok());

    std::env::set_var("PLATFORM_BASE_URL", "ftp://tracking.example.com");
    assert!(PlatformConfig::from_env().unwrap().validate().is_err());
    clear();
}
