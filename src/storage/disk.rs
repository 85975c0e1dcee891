//! Durable cache storage on the local file system.
//!
//! Layout: one directory per cache under the root, named by the URL-safe
//! base64 of the cache name. Each entry is a `{hash}.body` file holding the
//! raw bytes and a `{hash}.toml` file holding the metadata. The metadata file
//! is written last, so an entry only becomes visible once its body is on disk.
//! Registration records are `registration-{hash}.toml` files in the root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::CacheStorage;
use crate::cache::{CacheKey, CachedAsset};
use crate::error::{Error, Result};
use crate::registration::RegistrationRecord;

const META_EXT: &str = "toml";
const BODY_EXT: &str = "body";

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    method: String,
    url: String,
    status: u16,
    stored_at: DateTime<Utc>,
    headers: Vec<(String, String)>,
}

/// Cache storage persisted under a root directory.
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, name: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(name))
    }

    fn entry_stem(&self, cache: &str, key: &CacheKey) -> PathBuf {
        self.cache_dir(cache).join(hex_digest(&key.to_string()))
    }

    fn registration_path(&self, script_url: &str) -> PathBuf {
        self.root
            .join(format!("registration-{}", hex_digest(script_url)))
            .with_extension(META_EXT)
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn hex_digest(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Writes `contents` to a temporary sibling, then renames it into place.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn cache_names(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let decoded = entry
                .file_name()
                .to_str()
                .and_then(|s| URL_SAFE_NO_PAD.decode(s).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(name) => names.push(name),
                None => log::debug!("Ignoring foreign directory {}", entry.path().display()),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn has_cache(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(self.cache_dir(name))
            .await
            .is_ok_and(|m| m.is_dir()))
    }

    async fn open_cache(&self, name: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.cache_dir(name)).await?;
        Ok(())
    }

    async fn delete_cache(&self, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(self.cache_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, cache: &str, key: &CacheKey) -> Result<Option<CachedAsset>> {
        let stem = self.entry_stem(cache, key);
        let Some(meta) = Self::read_meta(&stem.with_extension(META_EXT)).await? else {
            return Ok(None);
        };
        let body = match tokio::fs::read(stem.with_extension(BODY_EXT)).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("Cache entry {key} in {cache} has no body; treating as missing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(CachedAsset {
            url: meta.url,
            status: meta.status,
            headers: meta.headers,
            body: Bytes::from(body),
            stored_at: meta.stored_at,
        }))
    }

    async fn put(&self, cache: &str, key: CacheKey, asset: CachedAsset) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(self.cache_dir(cache)).await?;

        let stem = self.entry_stem(cache, &key);
        let meta = EntryMeta {
            method: key.method,
            url: key.url,
            status: asset.status,
            stored_at: asset.stored_at,
            headers: asset.headers,
        };
        let meta = toml::to_string(&meta)?;

        write_atomic(&stem.with_extension(BODY_EXT), &asset.body).await?;
        write_atomic(&stem.with_extension(META_EXT), meta.as_bytes()).await
    }

    async fn keys(&self, cache: &str) -> Result<Vec<CacheKey>> {
        let mut read_dir = match tokio::fs::read_dir(self.cache_dir(cache)).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != META_EXT) {
                continue;
            }
            match Self::read_meta(&path).await {
                Ok(Some(meta)) => keys.push(CacheKey {
                    method: meta.method,
                    url: meta.url,
                }),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable cache entry {}: {e}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn load_registration(&self, script_url: &str) -> Result<Option<RegistrationRecord>> {
        match tokio::fs::read_to_string(self.registration_path(script_url)).await {
            Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_registration(&self, record: &RegistrationRecord) -> Result<()> {
        let contents = toml::to_string(record)?;
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.root).await?;
        write_atomic(&self.registration_path(&record.script_url), contents.as_bytes()).await
    }

    async fn put_all(&self, cache: &str, entries: Vec<(CacheKey, CachedAsset)>) -> Result<()> {
        self.open_cache(cache).await?;
        for (key, asset) in entries {
            self.put(cache, key, asset)
                .await
                .map_err(|e| Error::Storage(format!("batch write to {cache} failed: {e}")))?;
        }
        Ok(())
    }
}
