use super::quota::{self, QuotaConfig};
use crate::domain::{PersistedPing, PingHeaders, QueuedPing};
use crate::storage::{StorageError, Store};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// Name of the store root holding persisted pings.
pub const PING_STORE_NAME: &str = "pings";

/// Receives every ping written to (or replayed from) the ping store.
#[cfg_attr(test, automock)]
pub trait PingObserver: Send + Sync {
    fn update(&self, identifier: &str, ping: &PersistedPing);
}

/// Durable storage for finished pings, keyed by identifier.
pub struct PingStore {
    store: Arc<dyn Store>,
    quota: QuotaConfig,
    observer: RwLock<Option<Weak<dyn PingObserver>>>,
}

impl std::fmt::Debug for PingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingStore")
            .field("store", &self.store.name())
            .field("quota", &self.quota)
            .field("has_observer", &self.observer().is_some())
            .finish()
    }
}

impl PingStore {
    pub fn new(store: Arc<dyn Store>, quota: QuotaConfig) -> Self {
        Self {
            store,
            quota,
            observer: RwLock::new(None),
        }
    }

    /// Registers the observer notified about new pings, replacing any previous one.
    ///
    /// Only a weak reference is kept.
    pub fn attach_observer(&self, observer: Weak<dyn PingObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn observer(&self) -> Option<Arc<dyn PingObserver>> {
        self.observer.read().as_ref().and_then(Weak::upgrade)
    }

    /// Persists a ping under `identifier`, then notifies the observer.
    ///
    /// An existing entry with the same identifier is overwritten.
    pub async fn record_ping(
        &self,
        path: impl Into<String>,
        identifier: &str,
        payload: Map<String, Value>,
        headers: Option<PingHeaders>,
    ) -> Result<(), StorageError> {
        let ping = PersistedPing::new(path, payload, headers);
        let stored = ping.to_stored_value();
        self.store
            .update(&[identifier], Box::new(move |_| stored))
            .await?;
        debug!(ping_id = identifier, path = %ping.path, "Recorded ping");

        if let Some(observer) = self.observer() {
            observer.update(identifier, &ping);
        }
        Ok(())
    }

    /// Removes a ping. Unknown identifiers are ignored.
    pub async fn delete_ping(&self, identifier: &str) -> Result<(), StorageError> {
        self.store.delete(&[identifier]).await?;
        debug!(ping_id = identifier, "Deleted ping");
        Ok(())
    }

    /// Returns every valid stored ping, oldest first.
    ///
    /// Entries with an unexpected shape are deleted.
    pub async fn get_all_pings(&self) -> Result<Vec<QueuedPing>, StorageError> {
        let root = match self.store.get(&[]).await? {
            Some(Value::Object(root)) => root,
            Some(_) => {
                warn!("Pings store root is not an object, clearing it");
                self.store.delete(&[]).await?;
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        };

        let mut pings = Vec::with_capacity(root.len());
        for (identifier, value) in root {
            match PersistedPing::from_stored_value(value) {
                Some(ping) => pings.push(QueuedPing::new(identifier, ping)),
                None => {
                    warn!(ping_id = %identifier, "Unexpected data found in storage for ping, clearing");
                    self.store.delete(&[identifier.as_str()]).await?;
                }
            }
        }

        pings.sort_by(|a, b| {
            a.ping
                .collection_date
                .cmp(&b.ping.collection_date)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        Ok(pings)
    }

    /// Enforces the storage quota and replays every surviving ping through the observer.
    pub async fn scan_pending_pings(&self) -> Result<(), StorageError> {
        let Some(observer) = self.observer() else {
            debug!("No observer attached, skipping pending pings scan");
            return Ok(());
        };

        let outcome = quota::enforce(self.get_all_pings().await?, &self.quota);
        for ping in &outcome.evicted {
            self.delete_ping(&ping.identifier).await?;
        }
        if !outcome.evicted.is_empty() {
            info!(
                evicted = outcome.evicted.len(),
                kept = outcome.kept.len(),
                "Evicted pending pings over quota"
            );
        }

        for queued in &outcome.kept {
            observer.update(&queued.identifier, &queued.ping);
        }
        Ok(())
    }

    /// Deletes every stored ping.
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        self.store.delete(&[]).await?;
        info!("Cleared all stored pings");
        Ok(())
    }
}
