//! Eager download of every recording into the media cache.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::stream::{self, StreamExt};
use reqwest::Url;

use crate::cache::NamedCache;
use crate::clients::ClientId;
use crate::messages::WorkerMessage;
use crate::request::{Destination, Request};
use crate::stats::{AssetOutcome, WarmUpSummary, WarmUpSummaryBuilder};
use crate::worker::CacheWorker;

/// Who receives `CACHE_COMPLETE` when a warm-up pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTarget {
    /// The page that asked for the pass.
    Client(ClientId),
    /// Every open page, used for the pass started by activation.
    AllClients,
}

/// Admits one warm-up pass at a time and collects the requesters that
/// arrive while it runs.
#[derive(Debug, Default)]
pub struct WarmUpGate {
    pending: Mutex<Option<Vec<CompletionTarget>>>,
}

impl WarmUpGate {
    fn lock(&self) -> MutexGuard<'_, Option<Vec<CompletionTarget>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `target`. Returns true if the caller should run a new pass,
    /// false if it was attached to the pass already running.
    pub fn try_begin(&self, target: CompletionTarget) -> bool {
        let mut pending = self.lock();
        if let Some(targets) = pending.as_mut() {
            if !targets.contains(&target) {
                targets.push(target);
            }
            false
        } else {
            *pending = Some(vec![target]);
            true
        }
    }

    /// Ends the running pass and returns everyone waiting on it.
    pub fn finish(&self) -> Vec<CompletionTarget> {
        self.lock().take().unwrap_or_default()
    }

    /// Returns true while a pass is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }
}

impl CacheWorker {
    /// Returns true while a warm-up pass is running.
    #[must_use]
    pub fn is_warming(&self) -> bool {
        self.warmup.is_running()
    }

    /// Fetches every media asset that is not cached yet.
    ///
    /// Progress is broadcast to all pages after each asset, whether it was
    /// fetched, already present or failed. When the pass ends each requester
    /// gets exactly one `CACHE_COMPLETE`. If a pass is already running the
    /// requester is attached to it and `None` is returned.
    pub async fn warm_up(&self, target: CompletionTarget) -> Option<WarmUpSummary> {
        if !self.warmup.try_begin(target) {
            log::info!("Warm-up already running; {target:?} will be notified when it ends");
            return None;
        }

        let summary = self.run_warm_up().await;
        self.notify_complete(self.warmup.finish());
        Some(summary)
    }

    async fn run_warm_up(&self) -> WarmUpSummary {
        let mut builder = WarmUpSummaryBuilder::new();
        let urls = match self.manifest().media_urls(self.origin()) {
            Ok(urls) => urls,
            Err(e) => {
                log::error!("Cannot resolve media manifest: {e}");
                return builder.build();
            }
        };

        let total = urls.len();
        let cache = self.media_cache();
        let concurrency = self.config().effective_concurrency(total);
        log::info!("Warming {total} media assets into {} ({concurrency} at a time)", cache.name());

        let cache = &cache;
        let mut results = stream::iter(urls)
            .map(|url| async move {
                let outcome = self.warm_asset(cache, &url).await;
                (url, outcome)
            })
            .buffer_unordered(concurrency);

        let mut completed = 0;
        while let Some((url, outcome)) = results.next().await {
            completed += 1;
            builder.record(outcome);
            self.clients().broadcast(&WorkerMessage::CacheProgress {
                url: url.to_string(),
                completed,
                total,
            });
        }

        let summary = builder.build();
        log::info!(
            "Warm-up finished: {} of {} cached, {} already cached, {} failed in {:?}",
            summary.assets_cached,
            summary.total(),
            summary.assets_skipped,
            summary.assets_failed,
            summary.elapsed
        );
        summary
    }

    async fn warm_asset(&self, cache: &NamedCache, url: &Url) -> AssetOutcome {
        match cache.contains(url).await {
            Ok(true) => return AssetOutcome::Skipped,
            Ok(false) => {}
            Err(e) => log::warn!("Cache lookup for {url} failed: {e}"),
        }

        let request = Request::get(url.clone()).with_destination(Destination::Audio);
        let response = match self.network().fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Failed to cache {url}: {e}");
                return AssetOutcome::Failed;
            }
        };
        if !response.is_cacheable() {
            log::error!(
                "Failed to cache {url}: HTTP {} ({:?})",
                response.status,
                response.kind
            );
            return AssetOutcome::Failed;
        }
        if self.is_redundant() {
            log::debug!("Worker {} superseded; not storing {url}", self.id());
            return AssetOutcome::Skipped;
        }

        let size = response.content_length();
        match cache.put(&request, response).await {
            Ok(()) => AssetOutcome::Cached(size),
            Err(e) => {
                log::error!("Failed to store {url}: {e}");
                AssetOutcome::Failed
            }
        }
    }

    fn notify_complete(&self, targets: Vec<CompletionTarget>) {
        if targets.contains(&CompletionTarget::AllClients) {
            self.clients().broadcast(&WorkerMessage::CacheComplete);
            return;
        }
        for target in targets {
            if let CompletionTarget::Client(id) = target {
                if !self.clients().post(id, WorkerMessage::CacheComplete) {
                    log::debug!("Client {id} left before warm-up completed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResponseType;
    use crate::storage::CacheStorage;
    use crate::testing::{TestBed, script};
    use crate::worker::WorkerEvent;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<WorkerMessage>) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn progress_counts(messages: &[WorkerMessage]) -> Vec<usize> {
        messages
            .iter()
            .filter_map(|m| match m {
                WorkerMessage::CacheProgress { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect()
    }

    fn completions(messages: &[WorkerMessage]) -> usize {
        messages
            .iter()
            .filter(|m| **m == WorkerMessage::CacheComplete)
            .count()
    }

    #[test]
    fn gate_admits_one_pass() {
        let gate = WarmUpGate::default();
        assert!(!gate.is_running());
        assert!(gate.try_begin(CompletionTarget::AllClients));
        assert!(gate.is_running());
        assert!(!gate.try_begin(CompletionTarget::AllClients));
        assert_eq!(gate.finish(), vec![CompletionTarget::AllClients]);
        assert!(!gate.is_running());
        assert!(gate.finish().is_empty());
    }

    #[tokio::test]
    async fn progress_is_strictly_increasing_then_one_completion() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));
        let (id, mut rx) = bed.clients.connect("/");

        let summary = worker.warm_up(CompletionTarget::Client(id)).await.unwrap();
        let total = worker.manifest().media.len();
        assert_eq!(summary.assets_cached, total);

        let messages = drain(&mut rx);
        assert_eq!(progress_counts(&messages), (1..=total).collect::<Vec<_>>());
        assert_eq!(messages.last(), Some(&WorkerMessage::CacheComplete));
        assert_eq!(completions(&messages), 1);
        for message in &messages[..total] {
            assert!(matches!(message, WorkerMessage::CacheProgress { total: t, .. } if *t == total));
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_pass() {
        let bed = TestBed::new();
        bed.network.fail("/assets/b.mp3");
        let worker = bed.worker(script("v1", "v1"));
        let (id, mut rx) = bed.clients.connect("/");

        let summary = worker.warm_up(CompletionTarget::Client(id)).await.unwrap();
        let total = worker.manifest().media.len();
        assert_eq!(summary.assets_cached, total - 1);
        assert_eq!(summary.assets_failed, 1);

        let keys = worker.media_cache().keys().await.unwrap();
        assert_eq!(keys.len(), total - 1);
        assert!(keys.iter().all(|key| !key.url.ends_with("/assets/b.mp3")));

        let messages = drain(&mut rx);
        assert_eq!(progress_counts(&messages).len(), total);
        assert_eq!(completions(&messages), 1);
    }

    #[tokio::test]
    async fn error_status_counts_as_failure() {
        let bed = TestBed::new();
        bed.network.serve_status("/assets/c.mp3", reqwest::StatusCode::NOT_FOUND);
        let worker = bed.worker(script("v1", "v1"));

        let summary = worker.warm_up(CompletionTarget::AllClients).await.unwrap();
        assert_eq!(summary.assets_failed, 1);
        assert!(!worker.media_cache().contains(&bed.url("/assets/c.mp3")).await.unwrap());
    }

    #[tokio::test]
    async fn redirected_response_is_not_stored() {
        let bed = TestBed::new();
        bed.network.serve_kind("/assets/a.mp3", ResponseType::Cors);
        let worker = bed.worker(script("v1", "v1"));

        let summary = worker.warm_up(CompletionTarget::AllClients).await.unwrap();
        assert_eq!(summary.assets_failed, 1);
        assert!(!worker.media_cache().contains(&bed.url("/assets/a.mp3")).await.unwrap());
    }

    #[tokio::test]
    async fn superseded_pass_does_not_recreate_old_cache() {
        let bed = TestBed::new();
        let old = bed.worker(script("v1", "v1"));
        old.install().await.unwrap();
        old.activate().await.unwrap();
        let new = bed.worker(script("v1", "v2"));
        new.install().await.unwrap();
        bed.network.pause();

        let running = tokio::spawn({
            let old = Arc::clone(&old);
            async move { old.warm_up(CompletionTarget::AllClients).await }
        });
        while !old.is_warming() {
            tokio::task::yield_now().await;
        }

        new.activate().await.unwrap();
        old.mark_redundant();
        bed.network.resume();

        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.assets_cached, 0);
        assert_eq!(
            bed.storage.cache_names().await.unwrap(),
            vec!["cutting-machinery-shell-v1".to_string()]
        );
    }

    #[tokio::test]
    async fn second_pass_skips_cached_assets() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));
        worker.warm_up(CompletionTarget::AllClients).await.unwrap();
        let fetched = bed.network.requested().len();

        let (_id, mut rx) = bed.clients.connect("/");
        let summary = worker.warm_up(CompletionTarget::AllClients).await.unwrap();
        let total = worker.manifest().media.len();
        assert_eq!(summary.assets_skipped, total);
        assert_eq!(summary.assets_cached, 0);
        assert_eq!(bed.network.requested().len(), fetched);

        let messages = drain(&mut rx);
        assert_eq!(progress_counts(&messages), (1..=total).collect::<Vec<_>>());
        assert_eq!(completions(&messages), 1);
    }

    #[tokio::test]
    async fn completion_goes_to_requester_only() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));
        let (requester, mut rx_requester) = bed.clients.connect("/");
        let (_other, mut rx_other) = bed.clients.connect("/");

        worker.warm_up(CompletionTarget::Client(requester)).await.unwrap();

        let total = worker.manifest().media.len();
        let mine = drain(&mut rx_requester);
        let theirs = drain(&mut rx_other);
        assert_eq!(completions(&mine), 1);
        assert_eq!(completions(&theirs), 0);
        assert_eq!(progress_counts(&theirs).len(), total);
    }

    #[tokio::test]
    async fn concurrent_trigger_joins_running_pass() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));
        let (first, mut rx_first) = bed.clients.connect("/");
        let (second, mut rx_second) = bed.clients.connect("/");
        bed.network.pause();

        let running = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.warm_up(CompletionTarget::Client(first)).await }
        });
        while !worker.is_warming() {
            tokio::task::yield_now().await;
        }

        assert!(worker.warm_up(CompletionTarget::Client(second)).await.is_none());
        bed.network.resume();
        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.assets_cached, worker.manifest().media.len());

        let total = worker.manifest().media.len();
        let fetched = bed
            .network
            .requested()
            .into_iter()
            .filter(|path| worker.manifest().is_media_path(path))
            .count();
        assert_eq!(fetched, total);
        assert_eq!(completions(&drain(&mut rx_first)), 1);
        assert_eq!(completions(&drain(&mut rx_second)), 1);
    }

    #[tokio::test]
    async fn page_command_starts_warm_up() {
        let bed = TestBed::new();
        let worker = bed.worker(script("v1", "v1"));
        let (id, mut rx) = bed.clients.connect("/");

        worker
            .dispatch(WorkerEvent::Message {
                from: id,
                data: r#"{"type":"CACHE_ALL_MEDITATIONS"}"#.to_string(),
            })
            .await
            .unwrap();

        let messages = drain(&mut rx);
        assert_eq!(progress_counts(&messages).len(), worker.manifest().media.len());
        assert_eq!(completions(&messages), 1);
    }
}
