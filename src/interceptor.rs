//! Cache-first handling of intercepted requests.

use reqwest::{Method, StatusCode, Url};

use crate::cache::NamedCache;
use crate::error::{Error, Result};
use crate::range;
use crate::request::{Request, Response};
use crate::worker::CacheWorker;

/// Body of the synthetic response for media that is neither cached nor reachable.
pub const MEDIA_OFFLINE_BODY: &str = "Audio file not available offline";

/// Which cache a same-origin request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    /// Listed in the media manifest.
    Media,
    /// Everything else on the origin.
    Shell,
}

/// How the worker answered a fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; the request goes to the network unchanged.
    Passthrough(Request),
    /// Answered by the worker, from cache, network or a fallback.
    Respond(Response),
}

impl CacheWorker {
    /// Classifies a same-origin URL by its path.
    #[must_use]
    pub fn classify(&self, url: &Url) -> AssetClass {
        if self.manifest().is_media_path(url.path()) {
            AssetClass::Media
        } else {
            AssetClass::Shell
        }
    }

    fn cache_for(&self, class: AssetClass) -> NamedCache {
        match class {
            AssetClass::Media => self.media_cache(),
            AssetClass::Shell => self.shell_cache(),
        }
    }

    /// Answers an intercepted request.
    ///
    /// Cross-origin and non-GET requests pass through. Everything else is
    /// served cache-first; a miss is fetched and, if it is a complete
    /// same-origin response, stored before being returned. Media hits honour
    /// `Range` headers. A miss for a range request fetches the full body.
    ///
    /// # Errors
    ///
    /// Returns the network error when a request misses the cache, the network
    /// is unreachable, and no offline fallback applies.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome> {
        if !self.is_same_origin(&request.url) || request.method != Method::GET {
            return Ok(FetchOutcome::Passthrough(request));
        }

        let class = self.classify(&request.url);
        let cache = self.cache_for(class);

        match cache.match_url(&request.url).await {
            Ok(Some(asset)) => {
                log::debug!("Cache hit in {}: {}", cache.name(), request.url);
                let response = match (class, request.range_header()) {
                    (AssetClass::Media, Some(range)) => range::respond(&asset, range),
                    (AssetClass::Media, None) => range::full_response(&asset),
                    (AssetClass::Shell, _) => asset.to_response(),
                };
                return Ok(FetchOutcome::Respond(response));
            }
            Ok(None) => {}
            Err(e) => log::warn!("Cache lookup for {} failed: {e}", request.url),
        }

        let request = match class {
            AssetClass::Media => request.without_range(),
            AssetClass::Shell => request,
        };
        match self.fetch_and_store(&cache, &request).await {
            Ok(response) => Ok(FetchOutcome::Respond(response)),
            Err(e) => self.offline_fallback(&request, class, e).await,
        }
    }

    /// Fetches from the network and stores a copy of cacheable responses.
    async fn fetch_and_store(&self, cache: &NamedCache, request: &Request) -> Result<Response> {
        let response = self.network().fetch(request).await?;
        if self.is_redundant() {
            log::debug!("Worker {} superseded; not storing {}", self.id(), request.url);
        } else if response.is_cacheable() {
            if let Err(e) = cache.put(request, response.clone()).await {
                log::warn!("Failed to store {} in {}: {e}", request.url, cache.name());
            }
        } else {
            log::debug!(
                "Not caching {} ({}, {:?})",
                request.url,
                response.status,
                response.kind
            );
        }
        Ok(response)
    }

    async fn offline_fallback(
        &self,
        request: &Request,
        class: AssetClass,
        error: Error,
    ) -> Result<FetchOutcome> {
        log::warn!("Fetch of {} failed: {error}", request.url);

        if request.is_navigation() {
            let offline = self.manifest().offline_url(self.origin())?;
            return match self.shell_cache().match_url(&offline).await {
                Ok(Some(page)) => Ok(FetchOutcome::Respond(page.to_response())),
                Ok(None) => Err(error),
                Err(e) => {
                    log::warn!("Offline page lookup failed: {e}");
                    Err(error)
                }
            };
        }

        match class {
            AssetClass::Media => Ok(FetchOutcome::Respond(Response::text(
                StatusCode::SERVICE_UNAVAILABLE,
                MEDIA_OFFLINE_BODY,
            ))),
            AssetClass::Shell => Err(error),
        }
    }
}
