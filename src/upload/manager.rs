use super::policy::DeliveryPolicy;
use super::rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterState};
use super::task::{UploadOutcome, UploadResult, UploadTask};
use super::uploader::Uploader;
use super::worker::{UploadTaskSource, UploadWorker};
use crate::domain::{PersistedPing, QueuedPing};
use crate::pings::{PingObserver, PingStore};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ManagerState {
    queue: VecDeque<QueuedPing>,
    processing: HashSet<String>,
    recoverable_failure_count: u32,
    wait_attempt_count: u32,
    rate_limiter: RateLimiter,
}

/// Turns stored pings into upload tasks and applies their results.
pub struct UploadManager {
    state: Mutex<ManagerState>,
    policy: DeliveryPolicy,
    ping_store: Arc<PingStore>,
    worker: Arc<UploadWorker>,
    this: Weak<UploadManager>,
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("UploadManager")
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("recoverable_failure_count", &state.recoverable_failure_count)
            .field("wait_attempt_count", &state.wait_attempt_count)
            .field("policy", &self.policy)
            .finish()
    }
}

impl UploadManager {
    /// Creates a manager and attaches it to `ping_store` as its observer.
    pub fn new(
        server_endpoint: impl Into<String>,
        uploader: Arc<dyn Uploader>,
        ping_store: Arc<PingStore>,
        policy: DeliveryPolicy,
        rate_limit: RateLimitConfig,
    ) -> Arc<Self> {
        let worker = Arc::new(UploadWorker::new(uploader, server_endpoint, policy));
        let manager = Arc::new_cyclic(|this| Self {
            state: Mutex::new(ManagerState {
                queue: VecDeque::new(),
                processing: HashSet::new(),
                recoverable_failure_count: 0,
                wait_attempt_count: 0,
                rate_limiter: RateLimiter::new(rate_limit),
            }),
            policy,
            ping_store: ping_store.clone(),
            worker,
            this: this.clone(),
        });

        let observer: Weak<dyn PingObserver> = manager.this.clone();
        ping_store.attach_observer(observer);
        manager
    }

    /// Adds a ping to the queue unless it is already queued or in flight.
    ///
    /// Returns whether the ping was enqueued.
    fn enqueue_ping(&self, ping: QueuedPing) -> bool {
        push_unique(&mut self.state.lock(), ping)
    }

    /// Starts a delivery poll. No-op if one is already running, apart from
    /// making it check for new tasks once more.
    pub fn trigger_upload(&self) {
        if let Some(this) = self.this.upgrade() {
            let source: Arc<dyn UploadTaskSource> = this;
            self.worker.work(source);
        }
    }

    /// Decides what the worker should do next.
    pub fn get_upload_task(&self) -> UploadTask {
        let mut state = self.state.lock();
        let task = next_task(&mut state, &self.policy);

        if !matches!(task, UploadTask::Wait(_)) {
            state.wait_attempt_count = 0;
        }
        if !matches!(task, UploadTask::Upload(_)) {
            state.recoverable_failure_count = 0;
        }
        task
    }

    /// Applies the result of an upload attempt to `ping`.
    pub async fn process_upload_response(&self, ping: QueuedPing, result: UploadResult) {
        if result.is_success_status() {
            self.state.lock().processing.remove(&ping.identifier);
            info!(ping_id = %ping.identifier, status = ?result.status, "Ping successfully sent");
            self.delete_ping(&ping.identifier).await;
            return;
        }

        if result.outcome == UploadOutcome::UnrecoverableFailure || result.is_client_error_status() {
            self.state.lock().processing.remove(&ping.identifier);
            warn!(
                ping_id = %ping.identifier,
                status = ?result.status,
                "Unrecoverable upload failure, ping will not be retried"
            );
            self.delete_ping(&ping.identifier).await;
            return;
        }

        warn!(
            ping_id = %ping.identifier,
            status = ?result.status,
            "Recoverable upload failure, will retry"
        );
        // Removal and requeue must happen under one lock.
        let mut state = self.state.lock();
        state.processing.remove(&ping.identifier);
        state.recoverable_failure_count += 1;
        push_unique(&mut state, ping);
    }

    async fn delete_ping(&self, identifier: &str) {
        if let Err(e) = self.ping_store.delete_ping(identifier).await {
            warn!(ping_id = identifier, error = %e, "Failed to delete ping from storage");
        }
    }

    /// Drops every queued ping except deletion requests, then waits for the
    /// delivery in progress to finish.
    pub async fn clear_pending_queue(&self) {
        {
            let mut state = self.state.lock();
            let before = state.queue.len();
            state.queue.retain(QueuedPing::is_deletion_request);
            debug!(dropped = before - state.queue.len(), "Cleared pending upload queue");
        }
        self.block_on_ongoing_uploads().await;
    }

    /// Resolves once the worker is idle.
    pub async fn block_on_ongoing_uploads(&self) {
        self.worker.wait_until_idle().await;
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().processing.len()
    }
}

fn push_unique(state: &mut ManagerState, ping: QueuedPing) -> bool {
    if state.processing.contains(&ping.identifier)
        || state.queue.iter().any(|queued| queued.identifier == ping.identifier)
    {
        debug!(ping_id = %ping.identifier, "Ping is already queued or in flight, ignoring");
        return false;
    }

    state.queue.push_back(ping);
    true
}

fn next_task(state: &mut ManagerState, policy: &DeliveryPolicy) -> UploadTask {
    if state.recoverable_failure_count >= policy.max_recoverable_failures {
        warn!(
            failures = state.recoverable_failure_count,
            "Reached the maximum number of recoverable failures for this upload session"
        );
        return UploadTask::Done;
    }

    if state.queue.is_empty() {
        return UploadTask::Done;
    }

    if let RateLimiterState::Throttled { remaining } = state.rate_limiter.get_state() {
        state.wait_attempt_count += 1;
        if state.wait_attempt_count > policy.max_wait_attempts {
            warn!(
                attempts = state.wait_attempt_count,
                "Reached the maximum number of wait attempts for this upload session"
            );
            return UploadTask::Done;
        }
        return UploadTask::Wait(remaining);
    }

    match state.queue.pop_front() {
        Some(ping) => {
            state.processing.insert(ping.identifier.clone());
            UploadTask::Upload(ping)
        }
        None => UploadTask::Done,
    }
}

impl PingObserver for UploadManager {
    fn update(&self, identifier: &str, ping: &PersistedPing) {
        if self.enqueue_ping(QueuedPing::new(identifier, ping.clone())) {
            self.trigger_upload();
        }
    }
}

impl UploadTaskSource for UploadManager {
    fn get_upload_task(&self) -> UploadTask {
        UploadManager::get_upload_task(self)
    }

    fn process_upload_response(&self, ping: QueuedPing, result: UploadResult) -> BoxFuture<'_, ()> {
        UploadManager::process_upload_response(self, ping, result).boxed()
    }
}
