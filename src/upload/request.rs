use super::policy::DeliveryPolicy;
use crate::domain::PersistedPing;
use bytes::Bytes;
use chrono::Utc;
use flate2::{Compression, write::GzEncoder};
use reqwest::header::{
    CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, DATE, HeaderMap, HeaderName, HeaderValue,
};
use std::io::Write;
use thiserror::Error;
use tracing::{debug, warn};

pub const TELEMETRY_AGENT_HEADER: &str = "x-telemetry-agent";

#[derive(Error, Debug)]
pub enum PingRequestError {
    #[error("Ping body of {size} bytes exceeds the {max} byte limit")]
    BodyOverflow { size: usize, max: usize },

    #[error("Ping payload could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

/// Value of the `X-Telemetry-Agent` header.
pub fn telemetry_agent() -> String {
    format!(
        "rask-telemetry/{} (Rust on {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

/// A request ready to be handed to an [`Uploader`](super::Uploader).
#[derive(Debug, Clone)]
pub struct PingRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl PingRequest {
    /// Serializes and compresses the payload of `ping` and builds its headers.
    pub fn build(ping: &PersistedPing, policy: &DeliveryPolicy) -> Result<Self, PingRequestError> {
        let max = policy.max_ping_body_size;
        let raw = serde_json::to_vec(&ping.payload)?;
        if raw.len() > max {
            return Err(PingRequestError::BodyOverflow {
                size: raw.len(),
                max,
            });
        }

        let (body, compressed) = match gzip(&raw) {
            Ok(compressed) => (compressed, true),
            Err(e) => {
                warn!(error = %e, "Failed to gzip ping body, sending it uncompressed");
                (raw, false)
            }
        };
        if body.len() > max {
            return Err(PingRequestError::BodyOverflow {
                size: body.len(),
                max,
            });
        }

        let headers = build_headers(ping, body.len(), compressed)?;
        debug!(path = %ping.path, size = body.len(), compressed, "Built ping request");

        Ok(Self {
            headers,
            body: Bytes::from(body),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_compressed(&self) -> bool {
        self.headers.contains_key(CONTENT_ENCODING)
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn header_value(value: &str) -> Result<HeaderValue, PingRequestError> {
    HeaderValue::from_str(value)
        .map_err(|e| PingRequestError::InvalidHeaderValue(format!("{value:?}: {e}")))
}

fn build_headers(
    ping: &PersistedPing,
    body_len: usize,
    compressed: bool,
) -> Result<HeaderMap, PingRequestError> {
    let mut headers = HeaderMap::new();

    for (name, value) in ping.headers.iter().flatten() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PingRequestError::InvalidHeaderName(format!("{name:?}: {e}")))?;
        headers.insert(name, header_value(value)?);
    }

    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(
        DATE,
        header_value(&Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string())?,
    );
    headers.insert(
        HeaderName::from_static(TELEMETRY_AGENT_HEADER),
        header_value(&telemetry_agent())?,
    );
    if compressed {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));

    Ok(headers)
}
