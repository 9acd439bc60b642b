//! Indirection for oversized callback payloads: a named, pluggable blob store plus the
//! `$ref` wire format that lets a callback job carry a pointer instead of the full body.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

/// A single blob-storage backend, addressed by opaque string keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// An in-memory `BlobStore`, useful for tests and ephemeral single-process deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    data: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        self.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|v| v.clone()))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.data.remove(key);
        Ok(())
    }
}

/// A `BlobStore` that writes one file per key under a configured root directory.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(key), data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Registry of named blob stores; the most recently registered one is the write default,
/// which is how a host migrates writes to a new store while old `$ref`s still resolve.
pub struct ExternalStorage {
    stores: Mutex<HashMap<String, std::sync::Arc<dyn BlobStore>>>,
    default_name: Mutex<Option<String>>,
    threshold_bytes: usize,
}

impl ExternalStorage {
    /// `threshold_bytes` is the serialized-JSON size above which `store` externalizes.
    pub fn new(threshold_bytes: usize) -> Self {
        Self { stores: Mutex::new(HashMap::new()), default_name: Mutex::new(None), threshold_bytes }
    }

    pub fn register(&self, name: impl Into<String>, store: std::sync::Arc<dyn BlobStore>) {
        let name = name.into();
        self.stores.lock().insert(name.clone(), store);
        *self.default_name.lock() = Some(name);
    }

    /// Stores `data` if no store is configured yet or it's under threshold, data is returned
    /// unchanged; otherwise it's written to the default store and a `$ref` is returned.
    pub async fn store(&self, data: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let default_name = self.default_name.lock().clone();
        let Some(default_name) = default_name else {
            return Ok(data);
        };
        let serialized = serde_json::to_vec(&data)?;
        if serialized.len() < self.threshold_bytes {
            return Ok(data);
        }
        let store = {
            let stores = self.stores.lock();
            stores.get(&default_name).cloned()
        };
        let Some(store) = store else {
            return Ok(data);
        };
        let key = Uuid::new_v4().to_string();
        store.put(&key, &serialized).await?;
        Ok(Self::make_ref(&default_name, &key))
    }

    pub fn make_ref(store: &str, key: &str) -> serde_json::Value {
        serde_json::json!({ "$ref": { "store": store, "key": key } })
    }

    /// `true` iff `value` is a map with exactly the `$ref` shape.
    pub fn is_ref(value: &serde_json::Value) -> bool {
        let Some(obj) = value.as_object() else { return false };
        if obj.len() != 1 {
            return false;
        }
        let Some(inner) = obj.get("$ref").and_then(|v| v.as_object()) else { return false };
        inner.len() == 2 && inner.contains_key("store") && inner.contains_key("key")
    }

    /// Resolves a `$ref` back into the original JSON value. Fails fast if the named store is
    /// unregistered or the key is missing.
    pub async fn fetch(&self, value: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let obj = value
            .get("$ref")
            .and_then(|v| v.as_object())
            .ok_or_else(|| anyhow::anyhow!("value is not a $ref"))?;
        let store_name = obj.get("store").and_then(|v| v.as_str()).ok_or_else(|| anyhow::anyhow!("$ref missing store"))?;
        let key = obj.get("key").and_then(|v| v.as_str()).ok_or_else(|| anyhow::anyhow!("$ref missing key"))?;
        let store = {
            let stores = self.stores.lock();
            stores.get(store_name).cloned()
        }
        .ok_or_else(|| anyhow::anyhow!("unregistered external storage backend {store_name:?}"))?;
        let bytes = store
            .get(key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("missing external storage key {key:?} in store {store_name:?}"))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Idempotent delete: a no-op on non-refs, unregistered stores, or missing keys.
    pub async fn delete(&self, value: &serde_json::Value) -> anyhow::Result<()> {
        if !Self::is_ref(value) {
            return Ok(());
        }
        let Some(obj) = value.get("$ref").and_then(|v| v.as_object()) else { return Ok(()) };
        let Some(store_name) = obj.get("store").and_then(|v| v.as_str()) else { return Ok(()) };
        let Some(key) = obj.get("key").and_then(|v| v.as_str()) else { return Ok(()) };
        let store = {
            let stores = self.stores.lock();
            stores.get(store_name).cloned()
        };
        if let Some(store) = store {
            store.delete(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn small_payloads_pass_through_unchanged() {
        let storage = ExternalStorage::new(1024);
        storage.register("mem", std::sync::Arc::new(MemoryBlobStore::new()));
        let data = serde_json::json!({"x": 1});
        let result = storage.store(data.clone()).await.unwrap();
        assert_eq!(result, data);
    }

    #[tokio::test]
    async fn large_payloads_are_externalized_and_fetchable() {
        let storage = ExternalStorage::new(16);
        storage.register("mem", std::sync::Arc::new(MemoryBlobStore::new()));
        let data = serde_json::json!({"body": "x".repeat(100)});
        let result = storage.store(data.clone()).await.unwrap();
        assert!(ExternalStorage::is_ref(&result));
        let fetched = storage.fetch(&result).await.unwrap();
        assert_eq!(fetched, data);
    }

    #[tokio::test]
    async fn fetch_fails_fast_on_unregistered_store() {
        let storage = ExternalStorage::new(1024);
        let reference = ExternalStorage::make_ref("nope", "some-key");
        assert!(storage.fetch(&reference).await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_missing_key() {
        let storage = ExternalStorage::new(1024);
        storage.register("mem", std::sync::Arc::new(MemoryBlobStore::new()));
        let reference = ExternalStorage::make_ref("mem", "missing-key");
        storage.delete(&reference).await.unwrap();
        storage.delete(&serde_json::json!({"not": "a ref"})).await.unwrap();
    }

    #[tokio::test]
    async fn file_blob_store_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("aht-test-{}", Uuid::new_v4()));
        let store = FileBlobStore::new(&dir);
        store.put("k1", b"hello").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some(b"hello".to_vec()));
        store.delete("k1").await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), None);
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
