use super::policy::DeliveryPolicy;
use super::request::PingRequest;
use super::task::{UploadResult, UploadTask};
use super::uploader::Uploader;
use crate::domain::QueuedPing;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Hands out upload tasks and consumes their results.
pub trait UploadTaskSource: Send + Sync {
    fn get_upload_task(&self) -> UploadTask;

    fn process_upload_response(&self, ping: QueuedPing, result: UploadResult) -> BoxFuture<'_, ()>;
}

/// Executes upload tasks one at a time.
pub struct UploadWorker {
    uploader: Arc<dyn Uploader>,
    server_endpoint: String,
    policy: DeliveryPolicy,
    // True while a poll is running.
    busy: watch::Sender<bool>,
    // Set by `work` so a poll that is ending checks for new tasks once more.
    rerun: AtomicBool,
}

impl std::fmt::Debug for UploadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadWorker")
            .field("server_endpoint", &self.server_endpoint)
            .field("policy", &self.policy)
            .field("busy", &*self.busy.borrow())
            .finish()
    }
}

impl UploadWorker {
    pub fn new(uploader: Arc<dyn Uploader>, server_endpoint: impl Into<String>, policy: DeliveryPolicy) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            uploader,
            server_endpoint: server_endpoint.into().trim_end_matches('/').to_string(),
            policy,
            busy,
            rerun: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    fn try_acquire(&self) -> bool {
        self.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        })
    }

    /// Starts polling `source` for tasks in the background.
    ///
    /// If a poll is already running it is asked to check for tasks once more
    /// before it ends. Must be called from within a tokio runtime.
    pub fn work(self: &Arc<Self>, source: Arc<dyn UploadTaskSource>) {
        self.rerun.store(true, Ordering::SeqCst);
        if !self.try_acquire() {
            debug!("Upload worker is busy, flagged a follow-up poll");
            return;
        }

        let worker = self.clone();
        tokio::spawn(async move { worker.poll(source).await });
    }

    async fn poll(&self, source: Arc<dyn UploadTaskSource>) {
        loop {
            self.rerun.store(false, Ordering::SeqCst);
            let waiting = self.run_session(source.as_ref()).await;

            if !waiting && self.rerun.load(Ordering::SeqCst) {
                continue;
            }

            self.busy.send_replace(false);

            // A `work` call may have seen the poll as busy right before it ended.
            if !waiting && self.rerun.load(Ordering::SeqCst) && self.try_acquire() {
                continue;
            }
            break;
        }
    }

    /// Executes tasks until the source answers `Wait` or `Done`.
    ///
    /// Returns whether the session ended on a `Wait`.
    async fn run_session(&self, source: &dyn UploadTaskSource) -> bool {
        loop {
            match source.get_upload_task() {
                UploadTask::Upload(ping) => {
                    let result = self.attempt_upload(&ping).await;
                    source.process_upload_response(ping, result).await;
                }
                UploadTask::Wait(remaining) => {
                    debug!(remaining_ms = remaining.as_millis() as u64, "Upload throttled");
                    return true;
                }
                UploadTask::Done => {
                    debug!("No more upload tasks");
                    return false;
                }
            }
        }
    }

    async fn attempt_upload(&self, ping: &QueuedPing) -> UploadResult {
        let request = match PingRequest::build(&ping.ping, &self.policy) {
            Ok(request) => request,
            Err(e) => {
                warn!(ping_id = %ping.identifier, error = %e, "Unable to build ping request, discarding");
                return UploadResult::unrecoverable_failure();
            }
        };

        let url = format!("{}{}", self.server_endpoint, ping.ping.path);
        debug!(ping_id = %ping.identifier, url = %url, "Uploading ping");
        self.uploader.post(url, request).await
    }

    /// Resolves once no poll is running.
    pub async fn wait_until_idle(&self) {
        let mut busy = self.busy.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = busy.wait_for(|busy| !*busy).await;
    }
}
