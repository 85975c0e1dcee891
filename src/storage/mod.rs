//! Cache storage abstraction.
//!
//! The worker never touches disk directly; it goes through [`CacheStorage`]
//! so tests can run against [`MemoryStorage`] while the binary uses the
//! durable [`DiskStorage`].

mod disk;
mod memory;

use async_trait::async_trait;

use crate::cache::{CacheKey, CachedAsset};
use crate::error::Result;
use crate::registration::RegistrationRecord;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// A set of named, durable key→asset caches, plus the registration record
/// that says which worker version those caches belong to.
///
/// Writes to the same cache are serialized by the implementation. Writing to
/// a cache that does not exist yet creates it.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Lists the names of all existing caches.
    async fn cache_names(&self) -> Result<Vec<String>>;

    /// Returns true if a cache with this name exists.
    async fn has_cache(&self, name: &str) -> Result<bool>;

    /// Creates the cache if it does not exist.
    async fn open_cache(&self, name: &str) -> Result<()>;

    /// Deletes a cache and all its entries. Returns false if it did not exist.
    async fn delete_cache(&self, name: &str) -> Result<bool>;

    /// Reads one entry.
    async fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<CachedAsset>>;

    /// Writes one entry, replacing any previous value.
    async fn put(&self, cache: &str, key: CacheKey, asset: CachedAsset) -> Result<()>;

    /// Lists the keys stored in a cache. Missing caches have no keys.
    async fn keys(&self, cache: &str) -> Result<Vec<CacheKey>>;

    /// Reads the registration persisted for `script_url`, if any.
    async fn load_registration(&self, script_url: &str) -> Result<Option<RegistrationRecord>>;

    /// Persists the active registration, replacing any earlier record for
    /// the same script URL.
    async fn save_registration(&self, record: &RegistrationRecord) -> Result<()>;

    /// Writes a batch of entries.
    async fn put_all(&self, cache: &str, entries: Vec<(CacheKey, CachedAsset)>) -> Result<()> {
        self.open_cache(cache).await?;
        for (key, asset) in entries {
            self.put(cache, key, asset).await?;
        }
        Ok(())
    }
}
