use super::config::{LogFormat, LogLevel};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// HTTP crates that are capped at `warn` unless overridden.
const DEFAULT_DIRECTIVES: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "h2=warn", "rustls=warn"];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to set global tracing subscriber: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Builds the filter string: the default level, the HTTP crate caps, then
/// any directives from `RUST_LOG` (which win over both).
pub fn build_filter_string(level: LogLevel, rust_log: Option<&str>) -> String {
    let default_level = tracing::Level::from(level).as_str().to_lowercase();
    let mut parts = vec![default_level];
    parts.extend(DEFAULT_DIRECTIVES.iter().map(|d| d.to_string()));
    if let Some(extra) = rust_log.filter(|s| !s.trim().is_empty()) {
        parts.push(extra.trim().to_string());
    }
    parts.join(",")
}

/// Installs the global subscriber.
pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter_string(level, rust_log.as_deref());
    let env_filter = EnvFilter::try_new(&filter).map_err(|source| LoggingError::InvalidFilter {
        filter: filter.clone(),
        source,
    })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Compact => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .compact(),
            ),
        )?,
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            ),
        )?,
    }
    Ok(())
}
