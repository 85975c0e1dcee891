//! In-process cache storage.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::CacheStorage;
use crate::cache::{CacheKey, CachedAsset};
use crate::error::Result;
use crate::registration::RegistrationRecord;

type Caches = BTreeMap<String, BTreeMap<CacheKey, CachedAsset>>;

/// Cache storage kept entirely in memory. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    caches: Mutex<Caches>,
    registrations: Mutex<BTreeMap<String, RegistrationRecord>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Caches> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn cache_names(&self) -> Result<Vec<String>> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn has_cache(&self, name: &str) -> Result<bool> {
        Ok(self.lock().contains_key(name))
    }

    async fn open_cache(&self, name: &str) -> Result<()> {
        self.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn delete_cache(&self, name: &str) -> Result<bool> {
        Ok(self.lock().remove(name).is_some())
    }

    async fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<CachedAsset>> {
        Ok(self
            .lock()
            .get(cache)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, cache: &str, key: CacheKey, asset: CachedAsset) -> Result<()> {
        self.lock()
            .entry(cache.to_string())
            .or_default()
            .insert(key, asset);
        Ok(())
    }

    async fn keys(&self, cache: &str) -> Result<Vec<CacheKey>> {
        Ok(self
            .lock()
            .get(cache)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_registration(&self, script_url: &str) -> Result<Option<RegistrationRecord>> {
        Ok(self
            .registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(script_url)
            .cloned())
    }

    async fn save_registration(&self, record: &RegistrationRecord) -> Result<()> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.script_url.clone(), record.clone());
        Ok(())
    }

    async fn put_all(&self, cache: &str, entries: Vec<(CacheKey, CachedAsset)>) -> Result<()> {
        // One lock for the whole batch so readers never see half of it.
        let mut caches = self.lock();
        let target = caches.entry(cache.to_string()).or_default();
        target.extend(entries);
        Ok(())
    }
}
