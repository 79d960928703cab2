use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Name of the ping that signals a user-requested data deletion.
pub const DELETION_REQUEST_PING_NAME: &str = "deletion-request";

/// Schema version embedded in every submission path.
pub const SCHEMA_VERSION: u32 = 1;

/// Extra headers attached to a ping at collection time (`X-Debug-Id`, `X-Source-Tags`, ...).
pub type PingHeaders = BTreeMap<String, String>;

/// A finished ping as it is persisted in the pings store.
///
/// The store layout is `{ "<identifier>": PersistedPing }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPing {
    pub collection_date: DateTime<Utc>,
    pub path: String,
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<PingHeaders>,
}

impl PersistedPing {
    pub fn new(path: impl Into<String>, payload: Map<String, Value>, headers: Option<PingHeaders>) -> Self {
        Self::with_collection_date(Utc::now(), path, payload, headers)
    }

    pub fn with_collection_date(
        collection_date: DateTime<Utc>,
        path: impl Into<String>,
        payload: Map<String, Value>,
        headers: Option<PingHeaders>,
    ) -> Self {
        Self {
            collection_date,
            path: path.into(),
            payload,
            headers,
        }
    }

    /// Whether this is a `deletion-request` ping.
    ///
    /// Paths look like `/submit/{app}/{ping}/{schema}/{id}`, so the ping name is
    /// the fourth `/`-separated segment.
    pub fn is_deletion_request(&self) -> bool {
        self.path.split('/').nth(3) == Some(DELETION_REQUEST_PING_NAME)
    }

    /// Size in bytes of the serialized persisted representation.
    pub fn size_in_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }

    /// Validates a raw store entry, returning `None` on any shape mismatch.
    pub fn from_stored_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn to_stored_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A ping waiting in the upload manager's in-memory queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedPing {
    pub identifier: String,
    pub ping: PersistedPing,
}

impl QueuedPing {
    pub fn new(identifier: impl Into<String>, ping: PersistedPing) -> Self {
        Self {
            identifier: identifier.into(),
            ping,
        }
    }

    pub fn is_deletion_request(&self) -> bool {
        self.ping.is_deletion_request()
    }
}

/// Builds the submission path for a ping.
pub fn submission_path(application_id: &str, ping_name: &str, identifier: &str) -> String {
    format!("/submit/{application_id}/{ping_name}/{SCHEMA_VERSION}/{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Map<String, Value> {
        json!({ "ping_info": { "seq": 0 } })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn deletion_request_is_detected_from_path() {
        let ping = PersistedPing::new(submission_path("app", "deletion-request", "abc"), payload(), None);
        assert!(ping.is_deletion_request());

        let ping = PersistedPing::new(submission_path("app", "metrics", "abc"), payload(), None);
        assert!(!ping.is_deletion_request());

        // The ping name must sit in its own segment.
        let ping = PersistedPing::new("/submit/deletion-request/app/1/abc", payload(), None);
        assert!(!ping.is_deletion_request());
    }

    #[test]
    fn stored_value_rejects_bad_shapes() {
        assert!(PersistedPing::from_stored_value(json!("not a ping")).is_none());
        assert!(
            PersistedPing::from_stored_value(json!({
                "collectionDate": "yesterday",
                "path": "/submit/a/b/1/c",
                "payload": {}
            }))
            .is_none()
        );
        assert!(
            PersistedPing::from_stored_value(json!({
                "collectionDate": "2024-05-01T10:00:00Z",
                "path": "/submit/a/b/1/c",
                "payload": [1, 2, 3]
            }))
            .is_none()
        );

        let ping = PersistedPing::from_stored_value(json!({
            "collectionDate": "2024-05-01T10:00:00Z",
            "path": "/submit/a/b/1/c",
            "payload": { "k": "v" },
            "headers": { "X-Debug-Id": "tag" }
        }))
        .unwrap();
        assert_eq!(ping.headers.unwrap()["X-Debug-Id"], "tag");
    }

    #[test]
    fn submission_path_layout() {
        assert_eq!(submission_path("app", "test", "p1"), "/submit/app/test/1/p1");
    }
}
