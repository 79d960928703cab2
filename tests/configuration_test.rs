use clap::CommandFactory;
use rask_telemetry::app::{Config, ConfigError, LogFormat, LogLevel};
use serial_test::serial;
use std::{env, time::Duration};
use tempfile::TempDir;

// Helper function to clean all environment variables before and after tests
fn clean_all_env_vars() {
    let env_vars = [
        "RASK_TELEMETRY_APP_ID",
        "RASK_TELEMETRY_ENDPOINT",
        "RASK_TELEMETRY_DISABLE_UPLOAD",
        "RASK_TELEMETRY_STORAGE_PATH",
        "MAX_PRE_INIT_QUEUE_SIZE",
        "MAX_PINGS_COUNT",
        "MAX_PINGS_SIZE_BYTES",
        "MAX_RECOVERABLE_FAILURES",
        "MAX_WAIT_ATTEMPTS",
        "MAX_PING_BODY_SIZE",
        "RATE_LIMIT_INTERVAL_SECS",
        "MAX_PINGS_PER_INTERVAL",
        "UPLOAD_TIMEOUT_SECS",
        "LOG_LEVEL",
        "LOG_FORMAT",
        "CONFIG_FILE",
    ];

    unsafe {
        for var in &env_vars {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_config_defaults() {
    clean_all_env_vars();
    let config = Config::from_args(["rask-telemetry"]).unwrap();

    assert_eq!(config.application_id, "rask-telemetry");
    assert_eq!(config.endpoint, "http://localhost:9700");
    assert!(!config.disable_upload);
    assert_eq!(config.max_pre_init_queue_size, 100);
    assert_eq!(config.max_pings_count, 250);
    assert_eq!(config.max_pings_size_bytes, 10 * 1024 * 1024);
    assert_eq!(config.log_level, LogLevel::Info);
    assert_eq!(config.log_format, LogFormat::Compact);
    assert_eq!(config.rate_limit_interval, Duration::from_secs(60));
    assert_eq!(config.upload_timeout, Duration::from_secs(10));
}

#[test]
#[serial]
fn test_config_from_args() {
    clean_all_env_vars();
    let config = Config::from_args([
        "rask-telemetry",
        "--application-id",
        "my-app",
        "--endpoint",
        "https://incoming.telemetry.test/",
        "--max-pings-per-interval",
        "5",
        "--log-level",
        "debug",
        "--log-format",
        "json",
        "--disable-upload",
        "--ping-name",
        "baseline",
    ])
    .unwrap();

    assert_eq!(config.application_id, "my-app");
    // Trailing slashes are trimmed so paths can be appended.
    assert_eq!(config.endpoint, "https://incoming.telemetry.test");
    assert_eq!(config.max_pings_per_interval, 5);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.log_format, LogFormat::Json);
    assert!(config.disable_upload);
    assert_eq!(config.ping_name.as_deref(), Some("baseline"));
}

#[test]
#[serial]
fn test_config_from_environment() {
    clean_all_env_vars();
    unsafe {
        env::set_var("RASK_TELEMETRY_ENDPOINT", "http://env-collector:9700");
        env::set_var("MAX_RECOVERABLE_FAILURES", "7");
        env::set_var("UPLOAD_TIMEOUT_SECS", "3");
    }

    let config = Config::from_args(["rask-telemetry"]).unwrap();
    assert_eq!(config.endpoint, "http://env-collector:9700");
    assert_eq!(config.max_recoverable_failures, 7);
    assert_eq!(config.upload_timeout, Duration::from_secs(3));

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_invalid_endpoint_is_rejected() {
    clean_all_env_vars();
    let err = Config::from_args(["rask-telemetry", "--endpoint", "not a url"]).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl(_)));

    let err = Config::from_args(["rask-telemetry", "--endpoint", "ftp://collector.test"]).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidUrl(_)));
}

#[test]
#[serial]
fn test_zero_limits_are_rejected() {
    clean_all_env_vars();
    for flag in [
        "--max-pings-count",
        "--max-ping-body-size",
        "--max-pings-per-interval",
        "--upload-timeout-secs",
    ] {
        let err = Config::from_args(["rask-telemetry", flag, "0"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)), "{flag} accepted 0");
    }
}

#[test]
fn test_application_id_with_slash_is_rejected() {
    let config = Config {
        application_id: "a/b".to_string(),
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
}

#[test]
#[serial]
fn test_config_file_overrides_defaults() {
    clean_all_env_vars();
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("telemetry.toml");
    std::fs::write(
        &config_path,
        r#"
application_id = "from-file"
endpoint = "http://file-collector:9700"
max_pings_count = 10
rate_limit_interval_secs = 30
log_level = "warn"
"#,
    )
    .unwrap();

    let config = Config::from_args([
        "rask-telemetry",
        "--config-file",
        config_path.to_str().unwrap(),
        "--ping-name",
        "metrics",
    ])
    .unwrap();

    assert_eq!(config.application_id, "from-file");
    assert_eq!(config.endpoint, "http://file-collector:9700");
    assert_eq!(config.max_pings_count, 10);
    assert_eq!(config.rate_limit_interval, Duration::from_secs(30));
    assert_eq!(config.log_level, LogLevel::Warn);
    // Unset keys keep their defaults.
    assert_eq!(config.max_wait_attempts, 3);
    assert_eq!(config.ping_name.as_deref(), Some("metrics"));
    assert_eq!(config.config_file.as_deref(), Some(config_path.as_path()));
}

#[test]
fn test_malformed_config_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("broken.toml");
    std::fs::write(&config_path, "max_pings_count = \"many\"").unwrap();

    assert!(matches!(
        Config::from_file(&config_path),
        Err(ConfigError::ParseError(_))
    ));
    assert!(matches!(
        Config::from_file(temp_dir.path().join("missing.toml")),
        Err(ConfigError::FileError(_))
    ));
}

#[test]
fn test_conversion_to_telemetry_config() {
    let mut config = Config {
        application_id: "converted".to_string(),
        disable_upload: true,
        max_pings_count: 42,
        max_ping_body_size: 2048,
        max_pings_per_interval: 9,
        rate_limit_interval_secs: 15,
        ..Config::default()
    };
    config.post_process().unwrap();

    let telemetry = config.to_telemetry_config();
    assert_eq!(telemetry.application_id, "converted");
    assert!(!telemetry.upload_enabled);
    assert_eq!(telemetry.quota.max_count, 42);
    assert_eq!(telemetry.policy.max_ping_body_size, 2048);
    assert_eq!(telemetry.rate_limit.max_pings_per_interval, 9);
    assert_eq!(telemetry.rate_limit.interval, Duration::from_secs(15));
}

#[test]
fn test_version_flag_reports_package_version() {
    let command = Config::command();
    assert_eq!(command.get_version(), Some(env!("CARGO_PKG_VERSION")));

    let err = Config::command()
        .try_get_matches_from(["rask-telemetry", "--version"])
        .unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
}
