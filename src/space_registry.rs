//! Authoritative registry of Spaces (§4.4). `config.json` at each bucket
//! root is the source of truth; the in-process `DashMap` cache is a
//! performance accelerator rebuilt from the ObjectStore at startup,
//! refreshed only on the explicit mutators below.

use crate::error::{AppError, AppResult};
use crate::model::{Space, SpaceConfig, SpaceConfigDocument};
use crate::object_store::{JsonGet, ObjectStore};
use crate::sanitize::{sanitize_bucket_name, sanitize_collection_name};
use crate::vector_store::VectorStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

const CONFIG_KEY: &str = "config.json";

pub struct SpaceRegistry {
    object_store: Arc<dyn ObjectStore>,
    vector_store: Arc<dyn VectorStore>,
    cache: DashMap<String, Space>,
    /// Single-writer discipline for cache mutators (§5: "concurrent
    /// mutators require serialization via a registry-wide mutex").
    write_lock: Mutex<()>,
    current: Mutex<Option<String>>,
}

impl SpaceRegistry {
    pub fn new(object_store: Arc<dyn ObjectStore>, vector_store: Arc<dyn VectorStore>) -> Self {
        Self {
            object_store,
            vector_store,
            cache: DashMap::new(),
            write_lock: Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Rebuilds the cache from the ObjectStore's bucket list. Call once at
    /// startup; buckets whose `config.json` is absent or unreadable are
    /// skipped rather than treated as a fatal error.
    pub async fn sync(&self) -> AppResult<()> {
        let _guard = self.write_lock.lock();
        let buckets = self.object_store.list_buckets().await?;
        for bucket in buckets {
            if let JsonGet::Found(value) = self.object_store.get_json(&bucket, CONFIG_KEY).await? {
                if let Ok(doc) = serde_json::from_value::<SpaceConfigDocument>(value) {
                    let collection_key = sanitize_collection_name(&doc.name);
                    let mut space = Space::new(doc.name, bucket.clone(), collection_key, doc.config);
                    space.file_count = doc.file_count;
                    space.last_indexed = doc.last_indexed;
                    space.indexed_files_metadata = doc.indexed_files_metadata;
                    self.cache.insert(bucket, space);
                }
            }
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<Space> {
        self.cache.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, name: &str) -> AppResult<Space> {
        let key = sanitize_bucket_name(name);
        self.cache
            .get(&key)
            .map(|e| e.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("space '{name}'")))
    }

    pub fn current(&self) -> Option<Space> {
        let current = self.current.lock().clone()?;
        self.cache.get(&current).map(|e| e.value().clone())
    }

    pub fn select(&self, name: &str) -> AppResult<Space> {
        let space = self.get(name)?;
        *self.current.lock() = Some(space.storage_key.clone());
        Ok(space)
    }

    /// Rejects creation if another Space already resolves to the same
    /// `storage_key` (§9 Open Question 3 — the source has no such check).
    pub async fn create(&self, name: &str, config: Option<SpaceConfig>) -> AppResult<Space> {
        let _guard = self.write_lock.lock();

        let storage_key = sanitize_bucket_name(name);
        if let Some(existing) = self.cache.get(&storage_key) {
            if existing.name != name {
                return Err(AppError::Conflict(format!(
                    "space name '{name}' collides with existing space '{}' on storage key '{storage_key}'",
                    existing.name
                )));
            }
            return Err(AppError::Conflict(format!("space '{name}' already exists")));
        }

        let config = config.unwrap_or_default();
        config.validate().map_err(AppError::Invalid)?;

        let collection_key = sanitize_collection_name(name);
        self.object_store.ensure_bucket(&storage_key).await?;

        let space = Space::new(name.to_string(), storage_key.clone(), collection_key, config);
        let doc = SpaceConfigDocument::from(&space);
        self.object_store
            .put_json(&storage_key, CONFIG_KEY, &serde_json::to_value(&doc)?)
            .await?;

        self.cache.insert(storage_key.clone(), space.clone());
        *self.current.lock() = Some(storage_key);
        Ok(space)
    }

    pub async fn update_config(&self, name: &str, config: SpaceConfig) -> AppResult<Space> {
        config.validate().map_err(AppError::Invalid)?;
        let _guard = self.write_lock.lock();
        let mut entry = self
            .cache
            .get_mut(&sanitize_bucket_name(name))
            .ok_or_else(|| AppError::NotFound(format!("space '{name}'")))?;
        entry.config = config;
        let doc = SpaceConfigDocument::from(&*entry);
        self.object_store
            .put_json(&entry.storage_key, CONFIG_KEY, &serde_json::to_value(&doc)?)
            .await?;
        Ok(entry.clone())
    }

    pub async fn update_stats(&self, name: &str, file_count: usize, embedding_dim: Option<usize>) -> AppResult<Space> {
        let _guard = self.write_lock.lock();
        let mut entry = self
            .cache
            .get_mut(&sanitize_bucket_name(name))
            .ok_or_else(|| AppError::NotFound(format!("space '{name}'")))?;
        entry.file_count = file_count;
        entry.last_indexed = Some(chrono::Utc::now());
        if let Some(dim) = embedding_dim {
            entry.config.embedding_dim = Some(dim);
        }
        let doc = SpaceConfigDocument::from(&*entry);
        self.object_store
            .put_json(&entry.storage_key, CONFIG_KEY, &serde_json::to_value(&doc)?)
            .await?;
        Ok(entry.clone())
    }

    /// Replaces `Space.uploads` with a live listing of the `uploads/`
    /// prefix; never treated as authoritative local state.
    pub async fn sync_files(&self, name: &str) -> AppResult<Vec<String>> {
        let storage_key = self.get(name)?.storage_key;
        let uploads = self.object_store.list_objects(&storage_key, "uploads/").await?;
        if let Some(mut entry) = self.cache.get_mut(&storage_key) {
            entry.uploads = uploads.clone();
        }
        Ok(uploads)
    }

    /// Drops the vector collection (best-effort), deletes the bucket,
    /// evicts the cache entry, and resets `current` if it pointed here.
    pub async fn delete(&self, name: &str) -> AppResult<()> {
        let _guard = self.write_lock.lock();
        let space = self
            .cache
            .get(&sanitize_bucket_name(name))
            .map(|e| e.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("space '{name}'")))?;

        if let Err(e) = self.vector_store.drop_collection(&space.collection_key).await {
            tracing::warn!(space = %name, error = %e, "best-effort collection drop failed during space delete");
        }

        self.object_store.delete_bucket(&space.storage_key).await?;
        self.cache.remove(&space.storage_key);

        let mut current = self.current.lock();
        if current.as_deref() == Some(space.storage_key.as_str()) {
            *current = None;
        }
        Ok(())
    }
}
