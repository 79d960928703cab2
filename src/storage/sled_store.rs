use super::utils::{delete_nested, get_nested, update_nested};
use super::{StorageError, Store, StoreTransform};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Durable store backed by a sled tree named after the store.
///
/// Every top-level entry is one sled key holding the JSON encoding of its subtree.
#[derive(Clone)]
pub struct SledStore {
    name: String,
    tree: sled::Tree,
    // Serializes read-modify-write cycles.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("name", &self.name)
            .field("entries", &self.tree.len())
            .finish()
    }
}

impl SledStore {
    /// Opens (or creates) the database at `path` and binds to the tree `name`.
    pub fn open(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())?;
        debug!("Opened sled database at {}", path.as_ref().display());
        Self::with_db(&db, name)
    }

    pub fn with_db(db: &sled::Db, name: impl Into<String>) -> Result<Self, StorageError> {
        let name = name.into();
        let tree = db.open_tree(name.as_bytes())?;
        Ok(Self {
            name,
            tree,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&sled::Tree, &Mutex<()>) -> Result<T, StorageError> + Send + 'static,
    {
        let tree = self.tree.clone();
        let write_lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || op(&tree, &write_lock)).await?
    }
}

fn decode(key: &[u8], bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        warn!(
            key = %String::from_utf8_lossy(key),
            error = %e,
            "Unreadable entry in sled store"
        );
        Value::Null
    })
}

fn load_root(tree: &sled::Tree) -> Result<Map<String, Value>, StorageError> {
    let mut root = Map::new();
    for entry in tree.iter() {
        let (key, bytes) = entry?;
        root.insert(String::from_utf8_lossy(&key).into_owned(), decode(&key, &bytes));
    }
    Ok(root)
}

fn load_entry(tree: &sled::Tree, key: &str) -> Result<Map<String, Value>, StorageError> {
    let mut root = Map::new();
    if let Some(bytes) = tree.get(key.as_bytes())? {
        root.insert(key.to_string(), decode(key.as_bytes(), &bytes));
    }
    Ok(root)
}

fn store_entry(tree: &sled::Tree, key: &str, root: &Map<String, Value>) -> Result<(), StorageError> {
    match root.get(key) {
        Some(value) => {
            tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        }
        None => {
            tree.remove(key.as_bytes())?;
        }
    }
    Ok(())
}

fn owned(index: &[&str]) -> Vec<String> {
    index.iter().map(|segment| segment.to_string()).collect()
}

impl Store for SledStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get<'a>(&'a self, index: &'a [&'a str]) -> BoxFuture<'a, Result<Option<Value>, StorageError>> {
        let index = owned(index);
        async move {
            self.run_blocking(move |tree, _| {
                let index: Vec<&str> = index.iter().map(String::as_str).collect();
                let root = match index.first() {
                    None => load_root(tree)?,
                    Some(key) => load_entry(tree, key)?,
                };
                Ok(get_nested(&root, &index))
            })
            .await
        }
        .boxed()
    }

    fn update<'a>(
        &'a self,
        index: &'a [&'a str],
        transform: StoreTransform,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        let index = owned(index);
        async move {
            self.run_blocking(move |tree, write_lock| {
                let index: Vec<&str> = index.iter().map(String::as_str).collect();
                let Some(key) = index.first() else {
                    return Err(StorageError::InvalidIndex(
                        "cannot update the root of a store".to_string(),
                    ));
                };

                let _guard = write_lock.lock();
                let mut root = load_entry(tree, key)?;
                update_nested(&mut root, &index, transform)?;
                store_entry(tree, key, &root)
            })
            .await?;
            self.tree.flush_async().await?;
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, index: &'a [&'a str]) -> BoxFuture<'a, Result<(), StorageError>> {
        let index = owned(index);
        async move {
            self.run_blocking(move |tree, write_lock| {
                let index: Vec<&str> = index.iter().map(String::as_str).collect();
                let _guard = write_lock.lock();
                match index.as_slice() {
                    [] => tree.clear()?,
                    [key] => {
                        tree.remove(key.as_bytes())?;
                    }
                    [key, ..] => {
                        let mut root = load_entry(tree, key)?;
                        if delete_nested(&mut root, &index) {
                            store_entry(tree, key, &root)?;
                        }
                    }
                }
                Ok(())
            })
            .await?;
            self.tree.flush_async().await?;
            Ok(())
        }
        .boxed()
    }
}
