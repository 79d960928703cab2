use thiserror::Error;

/// Top-level error type for the telemetry SDK.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Dispatcher error: {0}")]
    Dispatcher(#[from] crate::dispatcher::DispatcherError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("Uploader error: {0}")]
    Uploader(String),

    #[error("Invalid ping payload: {0}")]
    InvalidPayload(String),
}
