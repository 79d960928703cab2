pub mod config;
pub mod logging;

pub use config::{Config, ConfigError, LogFormat, LogLevel, duration_serde};
pub use logging::{LoggingError, setup_logging};

use crate::context::Telemetry;
use crate::pings::PING_STORE_NAME;
use crate::storage::Store;
use serde_json::{Map, Value};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct App {
    config: Config,
    telemetry: Telemetry,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, Box<dyn std::error::Error + Send + Sync>>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        info!("Starting rask-telemetry v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "Configuration: application_id={}, endpoint={}, storage_path={}",
            config.application_id,
            config.endpoint,
            config.storage_path.display()
        );

        let store = open_store(&config)?;
        let telemetry = Telemetry::new(config.to_telemetry_config(), store, None)?;
        Ok(Self { config, telemetry })
    }

    /// Resumes delivery of stored pings, submits the requested ping and shuts down.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.telemetry.initialize();

        if let Some(ping_name) = &self.config.ping_name {
            let payload = match &self.config.payload_file {
                Some(path) => read_payload(path)?,
                None => Map::new(),
            };
            if !self.telemetry.submit_ping(ping_name.clone(), payload, None) {
                warn!(ping = %ping_name, "Ping submission was not queued");
            }
        }

        self.telemetry.flush().await;
        let manager = self.telemetry.upload_manager();
        if manager.pending_count() > 0 {
            info!(
                pending = manager.pending_count(),
                "Pings left for the next run"
            );
        }

        self.telemetry.shutdown().await;
        info!("rask-telemetry stopped.");
        Ok(())
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }
}

#[cfg(feature = "sled-store")]
fn open_store(config: &Config) -> Result<Arc<dyn Store>, crate::storage::StorageError> {
    let store = crate::storage::SledStore::open(&config.storage_path, PING_STORE_NAME)?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sled-store"))]
fn open_store(config: &Config) -> Result<Arc<dyn Store>, crate::storage::StorageError> {
    warn!(
        storage_path = %config.storage_path.display(),
        "Built without durable storage, pings are kept in memory"
    );
    Ok(Arc::new(crate::storage::MemoryStore::new(PING_STORE_NAME)))
}

fn read_payload(path: &std::path::Path) -> Result<Map<String, Value>, Box<dyn std::error::Error + Send + Sync>> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(payload) => Ok(payload),
        _ => Err(crate::domain::TelemetryError::InvalidPayload(format!(
            "{} does not contain a JSON object",
            path.display()
        ))
        .into()),
    }
}

// Main entry point for the application
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match Config::from_args(std::env::args()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };

    setup_logging(config.log_level, config.log_format)?;

    match App::from_config(config) {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            error!("Initialization error: {}", e);
            process::exit(1);
        }
    }

    Ok(())
}
