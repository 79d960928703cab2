#![allow(dead_code)]

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rask_telemetry::domain::submission_path;
use rask_telemetry::pings::{PING_STORE_NAME, PingStore, QuotaConfig};
use rask_telemetry::storage::MemoryStore;
use rask_telemetry::upload::{
    DeliveryPolicy, PingRequest, RateLimitConfig, UploadManager, UploadResult, Uploader,
};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const ENDPOINT: &str = "http://telemetry.test";

/// Uploader answering from a script, then with a fallback result.
pub struct FakeUploader {
    script: Mutex<VecDeque<UploadResult>>,
    fallback: UploadResult,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, PingRequest)>>,
}

impl FakeUploader {
    pub fn always(result: UploadResult) -> Arc<Self> {
        Self::scripted(Vec::new(), result)
    }

    pub fn scripted(script: Vec<UploadResult>, fallback: UploadResult) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn delayed(result: UploadResult, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: result,
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn requests(&self) -> Vec<PingRequest> {
        self.calls.lock().iter().map(|(_, request)| request.clone()).collect()
    }
}

impl Uploader for FakeUploader {
    fn post(&self, url: String, request: PingRequest) -> BoxFuture<'_, UploadResult> {
        self.calls.lock().push((url, request));
        let result = self.script.lock().pop_front().unwrap_or(self.fallback);
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}

pub fn payload() -> Map<String, Value> {
    json!({ "ping_info": { "seq": 0 }, "metrics": { "counter": { "clicks": 3 } } })
        .as_object()
        .cloned()
        .unwrap()
}

pub fn large_payload(bytes: usize) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("blob".into(), Value::String("x".repeat(bytes)));
    payload
}

pub fn path(ping_name: &str, id: &str) -> String {
    submission_path("app", ping_name, id)
}

pub struct Harness {
    pub backend: Arc<MemoryStore>,
    pub store: Arc<PingStore>,
    pub manager: Arc<UploadManager>,
    pub uploader: Arc<FakeUploader>,
}

pub fn harness(uploader: Arc<FakeUploader>, policy: DeliveryPolicy, rate_limit: RateLimitConfig) -> Harness {
    let backend = Arc::new(MemoryStore::new(PING_STORE_NAME));
    let store = Arc::new(PingStore::new(backend.clone(), QuotaConfig::default()));
    let manager = UploadManager::new(ENDPOINT, uploader.clone(), store.clone(), policy, rate_limit);
    Harness {
        backend,
        store,
        manager,
        uploader,
    }
}

pub fn unlimited() -> RateLimitConfig {
    RateLimitConfig {
        interval: Duration::from_secs(60),
        max_pings_per_interval: 1000,
    }
}
