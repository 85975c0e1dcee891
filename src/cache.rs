//! Named caches, cache keys and stored assets.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::request::{Request, Response, ResponseType};
use crate::storage::CacheStorage;

/// Identifies an entry inside a cache: method plus URL without query or fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Builds the key a request is stored and looked up under.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    /// Builds the key for a GET of `url`.
    #[must_use]
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_query(None);
        url.set_fragment(None);
        Self {
            method: method.as_str().to_string(),
            url: url.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// The versioned names of the two caches a worker owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub shell: String,
    pub media: String,
}

impl CacheNames {
    /// Builds `{prefix}-shell-{shell_version}` and `{prefix}-media-{media_version}`.
    #[must_use]
    pub fn new(prefix: &str, shell_version: &str, media_version: &str) -> Self {
        Self {
            shell: format!("{prefix}-shell-{shell_version}"),
            media: format!("{prefix}-media-{media_version}"),
        }
    }

    /// Returns true if `name` is one of the caches this worker keeps.
    #[must_use]
    pub fn is_current(&self, name: &str) -> bool {
        name == self.shell || name == self.media
    }
}

/// A response body stored in a cache, with the metadata needed to replay it.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub stored_at: DateTime<Utc>,
}

impl CachedAsset {
    /// Captures a network response for storage.
    #[must_use]
    pub fn from_response(url: &Url, response: Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            url: url.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body,
            stored_at: Utc::now(),
        }
    }

    /// Returns the stored `Content-Type`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()))
            .map(|(_, value)| value.as_str())
    }

    /// Size of the stored body in bytes.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.body.len() as u64
    }

    /// Rebuilds the header map, dropping entries that no longer parse.
    #[must_use]
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// Replays the stored response.
    #[must_use]
    pub fn to_response(&self) -> Response {
        Response {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers: self.header_map(),
            body: self.body.clone(),
            kind: ResponseType::Basic,
        }
    }
}

/// Handle to one named cache inside a [`CacheStorage`].
#[derive(Clone)]
pub struct NamedCache {
    storage: Arc<dyn CacheStorage>,
    name: String,
}

impl NamedCache {
    /// Creates a handle; the cache itself is created on first write.
    #[must_use]
    pub fn new(storage: Arc<dyn CacheStorage>, name: impl Into<String>) -> Self {
        Self {
            storage,
            name: name.into(),
        }
    }

    /// Returns the cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up the GET entry stored for `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    pub async fn match_url(&self, url: &Url) -> Result<Option<CachedAsset>> {
        self.storage.get(&self.name, &CacheKey::get(url)).await
    }

    /// Returns true if a GET entry for `url` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    pub async fn contains(&self, url: &Url) -> Result<bool> {
        Ok(self.match_url(url).await?.is_some())
    }

    /// Stores `response` under the key for `request`.
    ///
    /// Takes the response by value: callers hand over a copy and keep the
    /// original for the page.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage rejects the write.
    pub async fn put(&self, request: &Request, response: Response) -> Result<()> {
        let asset = CachedAsset::from_response(&request.url, response);
        self.storage
            .put(&self.name, CacheKey::for_request(request), asset)
            .await
    }

    /// Stores a batch of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage rejects any write.
    pub async fn put_all(&self, entries: Vec<(CacheKey, CachedAsset)>) -> Result<()> {
        self.storage.put_all(&self.name, entries).await
    }

    /// Lists the keys stored in this cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    pub async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.storage.keys(&self.name).await
    }
}

/// One line of a cache listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub name: String,
    pub entries: usize,
    /// True if the active worker keeps this cache on activation.
    pub current: bool,
}

/// Lists every cache in `storage` with its entry count.
///
/// # Errors
///
/// Returns an error if the storage cannot be read.
pub async fn summarize(
    storage: &dyn CacheStorage,
    current: Option<&CacheNames>,
) -> Result<Vec<CacheSummary>> {
    let mut summaries = Vec::new();
    for name in storage.cache_names().await? {
        let entries = storage.keys(&name).await?.len();
        summaries.push(CacheSummary {
            current: current.is_some_and(|names| names.is_current(&name)),
            name,
            entries,
        });
    }
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(summaries)
}
