//! Install and activate phases of a worker version.

use std::fmt;

use futures::future::try_join_all;
use reqwest::StatusCode;

use crate::cache::{CacheKey, CachedAsset};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::worker::CacheWorker;

/// Lifecycle states: `Installing → Installed → Activating → Active`.
/// A failed install, or a successor taking over, ends in `Redundant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

impl WorkerState {
    /// Only an active worker answers fetches for pages.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// What activation cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Caches deleted because their names are not current.
    pub removed: Vec<String>,
    /// Number of pages claimed.
    pub claimed: usize,
}

impl CacheWorker {
    /// Moves from `expected` to `next`, rejecting any other starting state.
    fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<()> {
        let mut state = self.lock_state();
        if *state != expected {
            return Err(Error::InvalidState {
                expected,
                actual: *state,
            });
        }
        *state = next;
        Ok(())
    }

    /// Discards this worker. Used when install fails or a successor activates.
    pub fn mark_redundant(&self) {
        *self.lock_state() = WorkerState::Redundant;
    }

    /// Returns true once the worker has been discarded. A redundant worker
    /// may finish fetches in flight but never writes to its caches again.
    #[must_use]
    pub fn is_redundant(&self) -> bool {
        self.state() == WorkerState::Redundant
    }

    /// Resumes a version that an earlier run installed and activated, using
    /// the caches it left in storage. Nothing is fetched or evicted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the worker is not installing.
    pub fn restore(&self) -> Result<usize> {
        self.transition(WorkerState::Installing, WorkerState::Active)?;
        let claimed = self.clients().claim(self.id());
        log::info!(
            "Worker {} resumed from stored caches, controlling {claimed} page(s)",
            self.id()
        );
        Ok(claimed)
    }

    /// Precaches the shell manifest as one batch.
    ///
    /// Every shell asset is fetched before anything is written. If any fetch
    /// fails or returns a non-200 status, nothing is stored, a shell cache
    /// created by this install is removed again, and the worker becomes
    /// redundant. Install always requests immediate takeover, so a successful
    /// install is followed directly by activation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstallFailed`] if a shell asset cannot be fetched,
    /// [`Error::InvalidState`] if the worker is not installing, or a storage
    /// error if the batch cannot be written.
    pub async fn install(&self) -> Result<()> {
        let state = self.state();
        if state != WorkerState::Installing {
            return Err(Error::InvalidState {
                expected: WorkerState::Installing,
                actual: state,
            });
        }
        log::info!("Installing worker {}", self.id());

        match self.precache_shell().await {
            Ok(count) => {
                log::info!(
                    "Worker {} cached {count} shell assets in {}",
                    self.id(),
                    self.cache_names().shell
                );
                self.transition(WorkerState::Installing, WorkerState::Installed)
            }
            Err(e) => {
                log::error!("Install of worker {} failed: {e}", self.id());
                self.mark_redundant();
                Err(e)
            }
        }
    }

    async fn precache_shell(&self) -> Result<usize> {
        let cache = self.shell_cache();
        let existed = self.storage().has_cache(cache.name()).await?;
        let urls = self.manifest().shell_urls(self.origin())?;

        let fetches = urls.into_iter().map(|url| async move {
            let request = Request::get(url);
            let response =
                self.network()
                    .fetch(&request)
                    .await
                    .map_err(|e| Error::InstallFailed {
                        url: request.url.to_string(),
                        reason: e.to_string(),
                    })?;
            if response.status != StatusCode::OK {
                return Err(Error::InstallFailed {
                    url: request.url.to_string(),
                    reason: format!("HTTP {}", response.status),
                });
            }
            Ok((
                CacheKey::for_request(&request),
                CachedAsset::from_response(&request.url, response),
            ))
        });

        let written = match try_join_all(fetches).await {
            Ok(entries) => {
                let count = entries.len();
                cache.put_all(entries).await.map(|()| count)
            }
            Err(e) => Err(e),
        };

        if written.is_err() && !existed {
            if let Err(e) = self.storage().delete_cache(cache.name()).await {
                log::warn!("Failed to remove partial cache {}: {e}", cache.name());
            }
        }
        written
    }

    /// Deletes every cache that is neither the current shell nor the current
    /// media cache, then claims all open pages.
    ///
    /// The media cache is versioned on its own, so a shell-only upgrade keeps
    /// every recording already downloaded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the worker is not installed, or a
    /// storage error if the cache names cannot be listed. In the latter case
    /// the worker becomes redundant.
    pub async fn activate(&self) -> Result<ActivationReport> {
        self.transition(WorkerState::Installed, WorkerState::Activating)?;
        log::info!("Activating worker {}", self.id());

        let names = match self.storage().cache_names().await {
            Ok(names) => names,
            Err(e) => {
                log::error!("Activation of worker {} failed: {e}", self.id());
                self.mark_redundant();
                return Err(e);
            }
        };

        let mut report = ActivationReport::default();
        for name in names {
            if self.cache_names().is_current(&name) {
                continue;
            }
            log::info!("Removing old cache {name}");
            match self.storage().delete_cache(&name).await {
                Ok(_) => report.removed.push(name),
                Err(e) => log::warn!("Failed to remove old cache {name}: {e}"),
            }
        }

        report.claimed = self.clients().claim(self.id());
        self.transition(WorkerState::Activating, WorkerState::Active)?;
        log::info!(
            "Worker {} active, controlling {} page(s)",
            self.id(),
            report.claimed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CacheStorage;
    use crate::testing::{TestBed, script};
    use bytes::Bytes;

    #[tokio::test]
    async fn install_precaches_shell() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));

        worker.install().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Installed);

        let cache = worker.shell_cache();
        assert_eq!(cache.keys().await.unwrap().len(), worker.manifest().shell.len());
        let offline = cache
            .match_url(&bed.url("/offline.html"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(offline.body, Bytes::from_static(b"offline page"));
    }

    #[tokio::test]
    async fn install_failure_is_atomic() {
        let bed = TestBed::new();
        bed.network.fail("/css/main.css");
        let worker = bed.worker(script("v1", "v1"));

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, Error::InstallFailed { ref url, .. } if url.ends_with("/css/main.css")));
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(!bed.storage.has_cache("cutting-machinery-shell-v1").await.unwrap());
    }

    #[tokio::test]
    async fn install_rejects_error_status() {
        let bed = TestBed::new();
        bed.network.serve_status("/manifest.json", StatusCode::NOT_FOUND);
        let worker = bed.worker(script("v1", "v1"));

        assert!(matches!(
            worker.install().await,
            Err(Error::InstallFailed { .. })
        ));
        assert_eq!(worker.state(), WorkerState::Redundant);
    }

    #[tokio::test]
    async fn install_twice_is_rejected() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));
        worker.install().await.unwrap();
        assert!(matches!(
            worker.install().await,
            Err(Error::InvalidState {
                expected: WorkerState::Installing,
                actual: WorkerState::Installed
            })
        ));
    }

    #[tokio::test]
    async fn restore_activates_without_fetching() {
        let bed = TestBed::new();
        let (page, _rx) = bed.clients.connect("/");
        let worker = bed.worker(script("v1", "v1"));

        assert_eq!(worker.restore().unwrap(), 1);
        assert_eq!(worker.state(), WorkerState::Active);
        assert!(bed.network.requested().is_empty());
        let info = bed.clients.list().into_iter().find(|c| c.id == page).unwrap();
        assert_eq!(info.controller, Some(worker.id()));
        assert!(matches!(worker.restore(), Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn activate_requires_install() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));
        assert!(matches!(
            worker.activate().await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn activate_evicts_stale_caches_but_keeps_media() {
        let bed = TestBed::new();
        let first = bed.worker(script("v1", "v1"));
        first.install().await.unwrap();
        first.activate().await.unwrap();
        first
            .media_cache()
            .put(
                &Request::get(bed.url("/assets/a.mp3")),
                bed.network.body_response(b"recording"),
            )
            .await
            .unwrap();
        bed.storage.open_cache("unrelated-cache").await.unwrap();

        let second = bed.worker(script("v2", "v1"));
        second.install().await.unwrap();
        let report = second.activate().await.unwrap();

        assert_eq!(
            report.removed,
            vec![
                "cutting-machinery-shell-v1".to_string(),
                "unrelated-cache".to_string()
            ]
        );
        let mut names = bed.storage.cache_names().await.unwrap();
        names.sort();
        assert_eq!(
            names,
            vec![
                "cutting-machinery-media-v1".to_string(),
                "cutting-machinery-shell-v2".to_string()
            ]
        );
        let media = second
            .media_cache()
            .match_url(&bed.url("/assets/a.mp3"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(media.body, Bytes::from_static(b"recording"));
    }

    #[tokio::test]
    async fn activate_claims_open_pages() {
        let bed = TestBed::new();
        let (_id, _rx) = bed.clients.connect("/");
        let worker = bed.worker(script("v1", "v1"));
        worker.install().await.unwrap();

        let report = worker.activate().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(worker.state(), WorkerState::Active);
        assert_eq!(bed.clients.list()[0].controller, Some(worker.id()));
    }

    #[test]
    fn state_display() {
        assert_eq!(WorkerState::Installing.to_string(), "installing");
        assert_eq!(WorkerState::Redundant.to_string(), "redundant");
        assert!(WorkerState::Active.is_active());
        assert!(!WorkerState::Installed.is_active());
    }
}
