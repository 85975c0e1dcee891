//! The background cache worker and its typed event dispatch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::{CacheNames, NamedCache};
use crate::clients::{ClientId, Clients};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::host::{Host, Notification};
use crate::interceptor::FetchOutcome;
use crate::lifecycle::WorkerState;
use crate::manifest::CacheManifest;
use crate::messages::{PageCommand, WorkerMessage};
use crate::network::Network;
use crate::request::Request;
use crate::storage::CacheStorage;
use crate::warmup::{CompletionTarget, WarmUpGate};

/// Everything that defines one worker version: its constants and manifest.
///
/// Two scripts with the same fingerprint are the same worker; registering
/// one again does not reinstall it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerScript {
    pub config: WorkerConfig,
    pub manifest: CacheManifest,
}

impl WorkerScript {
    /// Creates a script from its parts.
    #[must_use]
    pub const fn new(config: WorkerConfig, manifest: CacheManifest) -> Self {
        Self { config, manifest }
    }

    /// SHA-256 over every field that affects worker behaviour, hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let config = &self.config;
        for field in [
            &config.cache_prefix,
            &config.shell_version,
            &config.media_version,
            &config.sync_tag,
            &config.push.title,
            &config.push.icon,
            &config.push.badge,
            &config.push.default_body,
            &self.manifest.offline_page,
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0]);
        }
        hasher.update([u8::from(config.warm_on_activate)]);
        hasher.update((config.warmup_concurrency as u64).to_le_bytes());
        for (section, paths) in [(b's', &self.manifest.shell), (b'm', &self.manifest.media)] {
            for path in paths {
                hasher.update([section]);
                hasher.update(path.as_bytes());
                hasher.update([0]);
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Services shared by every worker version.
#[derive(Clone)]
pub struct WorkerContext {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub clients: Arc<Clients>,
    pub host: Arc<dyn Host>,
}

/// Events delivered to a worker, one per lifecycle phase or page action.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message { from: ClientId, data: String },
    Sync { tag: String },
    Push { data: Option<String> },
    NotificationClick(Notification),
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventResult {
    /// The event was fully handled by side effects.
    Handled,
    /// Answer to a [`WorkerEvent::Fetch`].
    Fetch(FetchOutcome),
}

/// One version of the cache worker.
pub struct CacheWorker {
    id: u64,
    script: WorkerScript,
    names: CacheNames,
    origin: Url,
    ctx: WorkerContext,
    state: Mutex<WorkerState>,
    pub(crate) warmup: WarmUpGate,
}

impl CacheWorker {
    /// Creates a worker in the `Installing` state for pages served at `origin`.
    #[must_use]
    pub fn new(id: u64, script: WorkerScript, origin: Url, ctx: WorkerContext) -> Self {
        let names = CacheNames::new(
            &script.config.cache_prefix,
            &script.config.shell_version,
            &script.config.media_version,
        );
        Self {
            id,
            script,
            names,
            origin,
            ctx,
            state: Mutex::new(WorkerState::Installing),
            warmup: WarmUpGate::default(),
        }
    }

    /// Unique id of this worker version.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The script this worker was built from.
    #[must_use]
    pub const fn script(&self) -> &WorkerScript {
        &self.script
    }

    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.script.config
    }

    #[must_use]
    pub const fn manifest(&self) -> &CacheManifest {
        &self.script.manifest
    }

    /// The cache names this version keeps on activation.
    #[must_use]
    pub const fn cache_names(&self) -> &CacheNames {
        &self.names
    }

    /// The origin whose requests this worker governs.
    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    #[must_use]
    pub fn clients(&self) -> &Arc<Clients> {
        &self.ctx.clients
    }

    pub(crate) fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.ctx.storage
    }

    pub(crate) fn network(&self) -> &Arc<dyn Network> {
        &self.ctx.network
    }

    pub(crate) fn shell_cache(&self) -> NamedCache {
        NamedCache::new(Arc::clone(&self.ctx.storage), self.names.shell.clone())
    }

    pub(crate) fn media_cache(&self) -> NamedCache {
        NamedCache::new(Arc::clone(&self.ctx.storage), self.names.media.clone())
    }

    /// Returns true if `url` belongs to this worker's origin.
    #[must_use]
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Routes an event to its handler.
    ///
    /// # Errors
    ///
    /// Returns whatever error the handler for the event returns.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventResult> {
        match event {
            WorkerEvent::Install => self.install().await.map(|()| EventResult::Handled),
            WorkerEvent::Activate => self.activate().await.map(|_| EventResult::Handled),
            WorkerEvent::Fetch(request) => self.handle_fetch(request).await.map(EventResult::Fetch),
            WorkerEvent::Message { from, data } => {
                self.handle_message(from, &data).await;
                Ok(EventResult::Handled)
            }
            WorkerEvent::Sync { tag } => {
                self.handle_sync(&tag);
                Ok(EventResult::Handled)
            }
            WorkerEvent::Push { data } => self
                .handle_push(data.as_deref())
                .await
                .map(|_| EventResult::Handled),
            WorkerEvent::NotificationClick(notification) => self
                .handle_notification_click(&notification)
                .await
                .map(|()| EventResult::Handled),
        }
    }

    /// Handles a message posted by a page. Unknown messages are ignored.
    pub async fn handle_message(&self, from: ClientId, data: &str) {
        match PageCommand::parse(data) {
            Some(PageCommand::CacheAllMeditations) => {
                log::info!("Client {from} requested caching of all meditations");
                self.warm_up(CompletionTarget::Client(from)).await;
            }
            None => log::debug!("Worker {} ignored message from {from}", self.id),
        }
    }

    /// Resolves a background sync. There is no server to sync with, so a
    /// recognised tag only tells the first open page that sync finished.
    pub fn handle_sync(&self, tag: &str) {
        log::info!("Sync event {tag}");
        if tag != self.config().sync_tag {
            return;
        }
        if let Some(first) = self.ctx.clients.first() {
            self.ctx.clients.post(first, WorkerMessage::SyncComplete);
        }
    }

    /// Shows the reminder notification for a push message.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot display the notification.
    pub async fn handle_push(&self, data: Option<&str>) -> Result<Notification> {
        log::info!("Push received");
        let push = &self.config().push;
        let notification = Notification {
            title: push.title.clone(),
            body: data
                .filter(|d| !d.is_empty())
                .map_or_else(|| push.default_body.clone(), ToString::to_string),
            icon: push.icon.clone(),
            badge: push.badge.clone(),
        };
        self.ctx.host.show_notification(&notification).await?;
        Ok(notification)
    }

    /// Closes the clicked notification and brings the app forward, opening a
    /// new window at the root if no page is open.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot focus or open a window.
    pub async fn handle_notification_click(&self, notification: &Notification) -> Result<()> {
        log::info!("Notification click");
        if let Err(e) = self.ctx.host.close_notification(notification).await {
            log::warn!("Failed to close notification: {e}");
        }
        if let Some(id) = self.ctx.clients.first() {
            self.ctx.clients.focus(id);
            self.ctx.host.focus_client(id).await
        } else {
            self.ctx.host.open_window("/").await
        }
    }
}
