use super::request::{PingRequest, telemetry_agent};
use super::task::UploadResult;
use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport used by the delivery worker.
pub trait Uploader: Send + Sync {
    /// Sends `request` to `url`.
    ///
    /// Implementations must not fail: transport problems are reported through
    /// the returned [`UploadResult`].
    fn post(&self, url: String, request: PingRequest) -> BoxFuture<'_, UploadResult>;
}

/// Uploader backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
}

impl HttpUploader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(telemetry_agent())
            .build()?;
        Ok(Self { client })
    }
}

impl Uploader for HttpUploader {
    fn post(&self, url: String, request: PingRequest) -> BoxFuture<'_, UploadResult> {
        async move {
            let response = self
                .client
                .post(&url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status().as_u16();
                    debug!(url = %url, status, "Ping upload answered");
                    UploadResult::http_status(status)
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Ping upload failed");
                    UploadResult::recoverable_failure()
                }
            }
        }
        .boxed()
    }
}
