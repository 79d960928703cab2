use crate::context::TelemetryConfig;
use crate::pings::QuotaConfig;
use crate::upload::{DeliveryPolicy, RateLimitConfig};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable single-line output
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Application identifier used in submission paths
    #[arg(long, env = "RASK_TELEMETRY_APP_ID", default_value = "rask-telemetry")]
    pub application_id: String,

    /// Collection endpoint pings are posted to
    #[arg(long, env = "RASK_TELEMETRY_ENDPOINT", default_value = "http://localhost:9700")]
    pub endpoint: String,

    /// Disable ping upload (only deletion-request pings are sent)
    #[arg(long, env = "RASK_TELEMETRY_DISABLE_UPLOAD")]
    pub disable_upload: bool,

    /// Directory of the durable ping store
    #[arg(long, env = "RASK_TELEMETRY_STORAGE_PATH", default_value = "/tmp/rask-telemetry/pings")]
    pub storage_path: PathBuf,

    /// Calls buffered before initialization
    #[arg(long, env = "MAX_PRE_INIT_QUEUE_SIZE", default_value = "100")]
    pub max_pre_init_queue_size: usize,

    /// Maximum number of stored pings kept on startup
    #[arg(long, env = "MAX_PINGS_COUNT", default_value = "250")]
    pub max_pings_count: usize,

    /// Maximum total size of stored pings kept on startup, in bytes
    #[arg(long, env = "MAX_PINGS_SIZE_BYTES", default_value = "10485760")]
    pub max_pings_size_bytes: usize,

    /// Recoverable failures tolerated per upload session
    #[arg(long, env = "MAX_RECOVERABLE_FAILURES", default_value = "3")]
    pub max_recoverable_failures: u32,

    /// Throttled polls tolerated per upload session
    #[arg(long, env = "MAX_WAIT_ATTEMPTS", default_value = "3")]
    pub max_wait_attempts: u32,

    /// Maximum request body size, in bytes
    #[arg(long, env = "MAX_PING_BODY_SIZE", default_value = "1048576")]
    pub max_ping_body_size: usize,

    /// Rate limit window in seconds
    #[arg(long, env = "RATE_LIMIT_INTERVAL_SECS", default_value = "60")]
    pub rate_limit_interval_secs: u64,

    /// Uploads allowed per rate limit window
    #[arg(long, env = "MAX_PINGS_PER_INTERVAL", default_value = "15")]
    pub max_pings_per_interval: u32,

    /// HTTP upload timeout in seconds
    #[arg(long, env = "UPLOAD_TIMEOUT_SECS", default_value = "10")]
    pub upload_timeout_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Name of a ping to submit before exiting
    #[arg(long)]
    #[serde(skip)]
    pub ping_name: Option<String>,

    /// JSON file holding the payload of `--ping-name`
    #[arg(long, requires = "ping_name")]
    #[serde(skip)]
    pub payload_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub rate_limit_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub upload_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            application_id: "rask-telemetry".to_string(),
            endpoint: "http://localhost:9700".to_string(),
            disable_upload: false,
            storage_path: PathBuf::from("/tmp/rask-telemetry/pings"),
            max_pre_init_queue_size: 100,
            max_pings_count: 250,
            max_pings_size_bytes: 10 * 1024 * 1024,
            max_recoverable_failures: 3,
            max_wait_attempts: 3,
            max_ping_body_size: 1024 * 1024,
            rate_limit_interval_secs: 60,
            max_pings_per_interval: 15,
            upload_timeout_secs: 10,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            ping_name: None,
            payload_file: None,
            rate_limit_interval: Duration::from_secs(60),
            upload_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Parses CLI arguments (and their environment fallbacks).
    ///
    /// When `--config-file` is given the file replaces every other setting
    /// except the one-shot ping options.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);

        if let Some(path) = config.config_file.clone() {
            let mut from_file = Self::from_file(&path)?;
            from_file.config_file = Some(path);
            from_file.ping_name = config.ping_name.take();
            from_file.payload_file = config.payload_file.take();
            return Ok(from_file);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.rate_limit_interval = Duration::from_secs(self.rate_limit_interval_secs);
        self.upload_timeout = Duration::from_secs(self.upload_timeout_secs);
        self.endpoint = self.endpoint.trim_end_matches('/').to_string();
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid endpoint URL '{}': {}", self.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Endpoint '{}' must use http or https",
                self.endpoint
            )));
        }

        if self.application_id.is_empty() || self.application_id.contains('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "Application id '{}' must be non-empty and contain no '/'",
                self.application_id
            )));
        }

        let non_zero = [
            ("Pre-init queue size", self.max_pre_init_queue_size as u64),
            ("Max pings count", self.max_pings_count as u64),
            ("Max pings size", self.max_pings_size_bytes as u64),
            ("Max ping body size", self.max_ping_body_size as u64),
            ("Rate limit interval", self.rate_limit_interval_secs),
            ("Max pings per interval", u64::from(self.max_pings_per_interval)),
            ("Upload timeout", self.upload_timeout_secs),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            application_id: self.application_id.clone(),
            server_endpoint: self.endpoint.clone(),
            upload_enabled: !self.disable_upload,
            max_pre_init_queue_size: self.max_pre_init_queue_size,
            quota: QuotaConfig {
                max_count: self.max_pings_count,
                max_size: self.max_pings_size_bytes,
            },
            policy: DeliveryPolicy {
                max_recoverable_failures: self.max_recoverable_failures,
                max_wait_attempts: self.max_wait_attempts,
                max_ping_body_size: self.max_ping_body_size,
            },
            rate_limit: RateLimitConfig {
                interval: self.rate_limit_interval,
                max_pings_per_interval: self.max_pings_per_interval,
            },
            upload_timeout: self.upload_timeout,
        }
    }
}

// Helper module for duration serialization
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
