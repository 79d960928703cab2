use super::utils::{delete_nested, get_nested, update_nested};
use super::{StorageError, Store, StoreTransform};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Non-persistent store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    root: RwLock<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: RwLock::new(Map::new()),
        }
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get<'a>(&'a self, index: &'a [&'a str]) -> BoxFuture<'a, Result<Option<Value>, StorageError>> {
        let value = get_nested(&self.root.read(), index);
        futures::future::ready(Ok(value)).boxed()
    }

    fn update<'a>(
        &'a self,
        index: &'a [&'a str],
        transform: StoreTransform,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        let result = update_nested(&mut self.root.write(), index, transform);
        futures::future::ready(result).boxed()
    }

    fn delete<'a>(&'a self, index: &'a [&'a str]) -> BoxFuture<'a, Result<(), StorageError>> {
        delete_nested(&mut self.root.write(), index);
        futures::future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_get_delete() {
        let store = MemoryStore::new("pings");
        assert_eq!(store.get(&["p1"]).await.unwrap(), None);

        store
            .update(&["p1"], Box::new(|_| json!({ "path": "/a" })))
            .await
            .unwrap();
        assert_eq!(
            store.get(&["p1", "path"]).await.unwrap(),
            Some(json!("/a"))
        );

        store.delete(&["p1"]).await.unwrap();
        store.delete(&["p1"]).await.unwrap();
        assert_eq!(store.get(&[]).await.unwrap(), Some(json!({})));
    }
}
