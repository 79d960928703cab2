#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. DispatcherError in dispatcher module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod app;
pub mod context;
pub mod dispatcher;
pub mod domain;
pub mod pings;
pub mod storage;
pub mod upload;

// Re-export main types for easy access
pub use app::{App, Config};
pub use context::{Telemetry, TelemetryConfig};
pub use dispatcher::{Dispatcher, DispatcherState};
pub use domain::{PersistedPing, QueuedPing, TelemetryError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
