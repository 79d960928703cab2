//! The telemetry context owning the dispatcher, the ping store and the uploader.

use crate::dispatcher::{DEFAULT_MAX_PRE_INIT_QUEUE_SIZE, Dispatcher};
use crate::domain::{
    DELETION_REQUEST_PING_NAME, PingHeaders, TelemetryError, submission_path,
};
use crate::pings::{PingStore, QuotaConfig};
use crate::storage::Store;
use crate::upload::{
    DEFAULT_UPLOAD_TIMEOUT, DeliveryPolicy, HttpUploader, RateLimitConfig, UploadManager, Uploader,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Library-level configuration of a [`Telemetry`] context.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    pub application_id: String,
    /// Base URL pings are posted to, without the submission path.
    pub server_endpoint: String,
    pub upload_enabled: bool,
    pub max_pre_init_queue_size: usize,
    pub quota: QuotaConfig,
    pub policy: DeliveryPolicy,
    pub rate_limit: RateLimitConfig,
    pub upload_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            application_id: "rask-telemetry".to_string(),
            server_endpoint: "http://localhost:9700".to_string(),
            upload_enabled: true,
            max_pre_init_queue_size: DEFAULT_MAX_PRE_INIT_QUEUE_SIZE,
            quota: QuotaConfig::default(),
            policy: DeliveryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

/// Entry point of the SDK.
///
/// Every state-mutating call is launched on the dispatcher and executes in call order.
pub struct Telemetry {
    config: TelemetryConfig,
    dispatcher: Dispatcher,
    ping_store: Arc<PingStore>,
    upload_manager: Arc<UploadManager>,
    upload_enabled: Arc<AtomicBool>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("upload_enabled", &self.is_upload_enabled())
            .finish()
    }
}

impl Telemetry {
    /// Builds a context on top of `store`.
    ///
    /// Without a custom `uploader` an [`HttpUploader`] is created. Must be called
    /// from within a tokio runtime.
    pub fn new(
        config: TelemetryConfig,
        store: Arc<dyn Store>,
        uploader: Option<Arc<dyn Uploader>>,
    ) -> Result<Self, TelemetryError> {
        let uploader = match uploader {
            Some(uploader) => uploader,
            None => Arc::new(
                HttpUploader::new(config.upload_timeout)
                    .map_err(|e| TelemetryError::Uploader(e.to_string()))?,
            ),
        };

        let ping_store = Arc::new(PingStore::new(store, config.quota));
        let upload_manager = UploadManager::new(
            config.server_endpoint.clone(),
            uploader,
            ping_store.clone(),
            config.policy,
            config.rate_limit,
        );

        Ok(Self {
            dispatcher: Dispatcher::new(config.max_pre_init_queue_size),
            upload_enabled: Arc::new(AtomicBool::new(config.upload_enabled)),
            config,
            ping_store,
            upload_manager,
        })
    }

    /// Starts executing queued calls, after resuming delivery of stored pings.
    ///
    /// With upload disabled, stored pings other than deletion requests are discarded first.
    pub fn initialize(&self) {
        let ping_store = self.ping_store.clone();
        let upload_enabled = self.upload_enabled.clone();
        self.dispatcher.flush_init_with(async move {
            if !upload_enabled.load(Ordering::SeqCst) {
                for queued in ping_store.get_all_pings().await? {
                    if !queued.is_deletion_request() {
                        ping_store.delete_ping(&queued.identifier).await?;
                    }
                }
            }
            ping_store.scan_pending_pings().await?;
            info!("Telemetry initialized");
            Ok(())
        });
    }

    /// Queues the submission of a finished ping named `ping_name`.
    ///
    /// Returns whether the submission was queued. While upload is disabled only
    /// deletion-request pings are recorded.
    pub fn submit_ping(
        &self,
        ping_name: impl Into<String>,
        payload: Map<String, Value>,
        headers: Option<PingHeaders>,
    ) -> bool {
        let ping_name = ping_name.into();
        let application_id = self.config.application_id.clone();
        let ping_store = self.ping_store.clone();
        let upload_enabled = self.upload_enabled.clone();

        self.dispatcher.launch_tagged(format!("submit:{ping_name}"), async move {
            if !upload_enabled.load(Ordering::SeqCst) && ping_name != DELETION_REQUEST_PING_NAME {
                debug!(ping = %ping_name, "Upload is disabled, not submitting ping");
                return Ok(());
            }

            let identifier = Uuid::new_v4().to_string();
            let path = submission_path(&application_id, &ping_name, &identifier);
            ping_store
                .record_ping(path, &identifier, payload, headers)
                .await?;
            Ok(())
        })
    }

    /// Queues a change of the upload-enabled flag.
    ///
    /// Disabling drops pending pings, clears storage and submits a deletion-request ping.
    pub fn set_upload_enabled(&self, enabled: bool) -> bool {
        let application_id = self.config.application_id.clone();
        let ping_store = self.ping_store.clone();
        let upload_manager = self.upload_manager.clone();
        let upload_enabled = self.upload_enabled.clone();

        self.dispatcher.launch_tagged("set_upload_enabled", async move {
            let was_enabled = upload_enabled.swap(enabled, Ordering::SeqCst);
            if enabled || !was_enabled {
                debug!(enabled, "Upload enabled flag updated");
                return Ok(());
            }

            info!("Upload disabled, clearing pending pings");
            upload_manager.clear_pending_queue().await;
            ping_store.clear_all().await?;

            let identifier = Uuid::new_v4().to_string();
            let path = submission_path(&application_id, DELETION_REQUEST_PING_NAME, &identifier);
            let payload = json!({
                "ping_info": { "reason": "upload_disabled" },
                "client_info": { "application_id": application_id },
            });
            let payload = payload.as_object().cloned().unwrap_or_default();
            ping_store.record_ping(path, &identifier, payload, None).await?;
            Ok(())
        })
    }

    pub fn is_upload_enabled(&self) -> bool {
        self.upload_enabled.load(Ordering::SeqCst)
    }

    /// Waits for every queued call and every delivery in progress.
    pub async fn flush(&self) {
        self.dispatcher.block_on_queue().await;
        self.upload_manager.block_on_ongoing_uploads().await;
    }

    /// Runs every call queued so far, rejects further calls and waits for
    /// the delivery in progress.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.upload_manager.block_on_ongoing_uploads().await;
        info!("Telemetry shut down");
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ping_store(&self) -> &Arc<PingStore> {
        &self.ping_store
    }

    pub fn upload_manager(&self) -> &Arc<UploadManager> {
        &self.upload_manager
    }
}
