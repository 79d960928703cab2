//! Domain layer for rask-telemetry.
//!
//! Contains the canonical types shared across all modules:
//! - `PersistedPing`: a finished ping as stored on disk
//! - `QueuedPing`: a persisted ping waiting for upload
//! - `TelemetryError`: Top-level error type

pub mod error;
pub mod ping;

pub use error::TelemetryError;
pub use ping::{
    DELETION_REQUEST_PING_NAME, PersistedPing, PingHeaders, QueuedPing, SCHEMA_VERSION,
    submission_path,
};
