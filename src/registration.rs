//! Registration of worker versions and routing of page traffic to the
//! controlling worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::clients::{ClientId, Clients};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::host::{LogHost, Notification};
use crate::interceptor::FetchOutcome;
use crate::lifecycle::ActivationReport;
use crate::messages::WorkerMessage;
use crate::network::HttpNetwork;
use crate::request::{Request, Response};
use crate::storage::{CacheStorage, DiskStorage};
use crate::warmup::CompletionTarget;
use crate::worker::{CacheWorker, EventResult, WorkerContext, WorkerEvent, WorkerScript};

/// URL the worker script is registered under.
pub const SCRIPT_URL: &str = "/sw.js";

struct Registration {
    fingerprint: String,
    active: Arc<CacheWorker>,
}

/// The active registration as kept in storage, so a restarted container
/// resumes the worker that owns the caches instead of reinstalling it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub script_url: String,
    pub fingerprint: String,
    pub activated_at: DateTime<Utc>,
    pub script: WorkerScript,
}

/// Result of [`ServiceWorkerContainer::register`].
pub enum RegistrationOutcome {
    /// The script is already active; nothing was installed.
    Unchanged(Arc<CacheWorker>),
    /// A new version installed and took control.
    Activated {
        worker: Arc<CacheWorker>,
        /// The version it superseded, now redundant.
        replaced: Option<Arc<CacheWorker>>,
        report: ActivationReport,
    },
    /// Install failed; the previous version, if any, stays in control.
    InstallFailed {
        error: Error,
        active: Option<Arc<CacheWorker>>,
    },
}

/// Owns worker registrations for one origin and forwards page traffic to
/// whichever worker currently controls it.
pub struct ServiceWorkerContainer {
    origin: Url,
    ctx: WorkerContext,
    registrations: tokio::sync::Mutex<HashMap<String, Registration>>,
    controller: Mutex<Option<Arc<CacheWorker>>>,
    next_id: AtomicU64,
}

impl ServiceWorkerContainer {
    /// Creates a container with no registered worker.
    #[must_use]
    pub fn new(origin: Url, ctx: WorkerContext) -> Self {
        Self {
            origin,
            ctx,
            registrations: tokio::sync::Mutex::new(HashMap::new()),
            controller: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Builds a container backed by disk storage and the upstream network.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin or upstream URL is invalid or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let origin = config.server.origin()?;
        let network = HttpNetwork::new(
            origin.clone(),
            config.server.upstream_url()?,
            Duration::from_secs(config.server.connect_timeout_secs),
        )?;
        let ctx = WorkerContext {
            storage: Arc::new(DiskStorage::new(config.paths.cache_dir.clone())),
            network: Arc::new(network),
            clients: Arc::new(Clients::new()),
            host: Arc::new(LogHost),
        };
        Ok(Self::new(origin, ctx))
    }

    fn lock_controller(&self) -> MutexGuard<'_, Option<Arc<CacheWorker>>> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The origin this container serves.
    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    /// The active worker controlling pages, if any.
    #[must_use]
    pub fn controller(&self) -> Option<Arc<CacheWorker>> {
        self.lock_controller()
            .clone()
            .filter(|worker| worker.state().is_active())
    }

    #[must_use]
    pub fn clients(&self) -> &Arc<Clients> {
        &self.ctx.clients
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.ctx.storage
    }

    /// Brings back the worker a previous run activated for `script_url`.
    /// Returns `None` if there is no usable record or its shell cache is gone.
    async fn restore(&self, script_url: &str) -> Option<Registration> {
        let record = match self.ctx.storage.load_registration(script_url).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Ignoring unreadable registration for {script_url}: {e}");
                return None;
            }
        };
        if record.script.fingerprint() != record.fingerprint {
            log::warn!("Stored registration for {script_url} does not match its script");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(CacheWorker::new(
            id,
            record.script,
            self.origin.clone(),
            self.ctx.clone(),
        ));
        let shell = &worker.cache_names().shell;
        match self.ctx.storage.has_cache(shell).await {
            Ok(true) => {}
            Ok(false) => {
                log::warn!("Shell cache {shell} is gone; {script_url} will be reinstalled");
                return None;
            }
            Err(e) => {
                log::warn!("Cannot check shell cache {shell}: {e}");
                return None;
            }
        }
        if let Err(e) = worker.restore() {
            log::warn!("Cannot resume worker for {script_url}: {e}");
            return None;
        }

        log::info!(
            "Resumed {script_url} as worker {id}, activated {}",
            record.activated_at
        );
        *self.lock_controller() = Some(Arc::clone(&worker));
        Some(Registration {
            fingerprint: record.fingerprint,
            active: worker,
        })
    }

    async fn persist(&self, script_url: &str, fingerprint: &str, worker: &CacheWorker) {
        let record = RegistrationRecord {
            script_url: script_url.to_string(),
            fingerprint: fingerprint.to_string(),
            activated_at: Utc::now(),
            script: worker.script().clone(),
        };
        if let Err(e) = self.ctx.storage.save_registration(&record).await {
            log::warn!("Failed to persist registration for {script_url}: {e}");
        }
    }

    /// Registers `script` under `script_url`.
    ///
    /// Registering the script that is already active is a no-op. The first
    /// registration in a process resumes the version a previous run left
    /// active, so an unchanged script is never reinstalled and a failed
    /// upgrade still leaves the stored version serving. Otherwise a new
    /// worker is installed; on success it activates immediately, replaces
    /// the previous version and, if configured, starts a background warm-up.
    ///
    /// # Errors
    ///
    /// Returns an error if the new worker installed but failed to activate.
    pub async fn register(
        &self,
        script_url: &str,
        script: WorkerScript,
    ) -> Result<RegistrationOutcome> {
        let mut registrations = self.registrations.lock().await;
        if !registrations.contains_key(script_url) {
            if let Some(restored) = self.restore(script_url).await {
                registrations.insert(script_url.to_string(), restored);
            }
        }
        let fingerprint = script.fingerprint();
        let previous = registrations.get(script_url).map(|r| Arc::clone(&r.active));

        if let Some(existing) = registrations.get(script_url) {
            if existing.fingerprint == fingerprint {
                log::debug!("{script_url} unchanged; worker {} stays active", existing.active.id());
                return Ok(RegistrationOutcome::Unchanged(Arc::clone(&existing.active)));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::new(CacheWorker::new(
            id,
            script,
            self.origin.clone(),
            self.ctx.clone(),
        ));
        log::info!("Registering {script_url} as worker {id}");

        if let Err(error) = worker.dispatch(WorkerEvent::Install).await {
            if let Some(active) = &previous {
                log::warn!("Keeping worker {} after failed upgrade", active.id());
            }
            return Ok(RegistrationOutcome::InstallFailed {
                error,
                active: previous,
            });
        }

        let report = worker.activate().await?;
        if let Some(old) = &previous {
            old.mark_redundant();
        }
        self.persist(script_url, &fingerprint, &worker).await;
        registrations.insert(
            script_url.to_string(),
            Registration {
                fingerprint,
                active: Arc::clone(&worker),
            },
        );
        *self.lock_controller() = Some(Arc::clone(&worker));
        drop(registrations);

        if worker.config().warm_on_activate {
            let warming = Arc::clone(&worker);
            tokio::spawn(async move {
                warming.warm_up(CompletionTarget::AllClients).await;
            });
        }

        Ok(RegistrationOutcome::Activated {
            worker,
            replaced: previous,
            report,
        })
    }

    /// Opens a page. The page is controlled by the active worker, if any.
    pub fn connect(&self, url: &str) -> (ClientId, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (id, rx) = self.ctx.clients.connect(url);
        if let Some(worker) = self.controller() {
            self.ctx.clients.control(id, worker.id());
        }
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) {
        self.ctx.clients.disconnect(id);
    }

    /// Delivers a page message to the controller without waiting for it to
    /// be handled. Returns false if no worker controls the page.
    pub fn post_message(&self, from: ClientId, data: String) -> bool {
        let Some(worker) = self.controller() else {
            log::debug!("Dropping message from {from}: no active worker");
            return false;
        };
        tokio::spawn(async move {
            if let Err(e) = worker.dispatch(WorkerEvent::Message { from, data }).await {
                log::error!("Message handling failed: {e}");
            }
        });
        true
    }

    /// Answers a page request through the controlling worker, or straight
    /// from the network when there is none or the worker passes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be answered at all.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        let request = match self.controller() {
            Some(worker) => match worker.dispatch(WorkerEvent::Fetch(request)).await? {
                EventResult::Fetch(FetchOutcome::Respond(response)) => return Ok(response),
                EventResult::Fetch(FetchOutcome::Passthrough(request)) => request,
                EventResult::Handled => {
                    return Err(Error::Network("fetch produced no response".to_string()));
                }
            },
            None => request,
        };
        self.ctx.network.fetch(&request).await
    }

    /// Delivers a push message. Returns the notification shown, if a worker
    /// is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot show the notification.
    pub async fn push(&self, data: Option<String>) -> Result<Option<Notification>> {
        match self.controller() {
            Some(worker) => worker.handle_push(data.as_deref()).await.map(Some),
            None => Ok(None),
        }
    }

    /// Fires a background sync. Returns false if no worker is active.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker fails to handle the event.
    pub async fn sync(&self, tag: &str) -> Result<bool> {
        let Some(worker) = self.controller() else {
            return Ok(false);
        };
        worker
            .dispatch(WorkerEvent::Sync {
                tag: tag.to_string(),
            })
            .await?;
        Ok(true)
    }

    /// Delivers a notification click.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot focus or open a window.
    pub async fn notification_click(&self, notification: Notification) -> Result<()> {
        match self.controller() {
            Some(worker) => worker
                .dispatch(WorkerEvent::NotificationClick(notification))
                .await
                .map(|_| ()),
            None => self.ctx.host.open_window("/").await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::WorkerState;
    use crate::testing::{TestBed, script};
    use bytes::Bytes;
    use reqwest::StatusCode;

    async fn activated(container: &ServiceWorkerContainer, script: WorkerScript) -> Arc<CacheWorker> {
        match container.register(SCRIPT_URL, script).await.unwrap() {
            RegistrationOutcome::Activated { worker, .. } => worker,
            _ => panic!("expected activation"),
        }
    }

    async fn recv_until_complete(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> usize {
        let mut progress = 0;
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match message {
                WorkerMessage::CacheProgress { .. } => progress += 1,
                WorkerMessage::CacheComplete => return progress,
                WorkerMessage::SyncComplete => {}
            }
        }
    }

    #[tokio::test]
    async fn registering_twice_keeps_one_worker() {
        let bed = TestBed::new();
        let container = bed.container();
        let first = activated(&container, script("v1", "v1")).await;
        let fetched = bed.network.requested().len();

        let again = container.register(SCRIPT_URL, script("v1", "v1")).await.unwrap();
        match again {
            RegistrationOutcome::Unchanged(worker) => assert_eq!(worker.id(), first.id()),
            _ => panic!("expected unchanged registration"),
        }
        assert_eq!(bed.network.requested().len(), fetched);
        assert_eq!(container.controller().unwrap().id(), first.id());
        assert_eq!(first.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn upgrade_replaces_previous_worker() {
        let bed = TestBed::new();
        let container = bed.container();
        let first = activated(&container, script("v1", "v1")).await;

        let outcome = container.register(SCRIPT_URL, script("v2", "v1")).await.unwrap();
        let RegistrationOutcome::Activated { worker, replaced, report } = outcome else {
            panic!("expected activation");
        };
        assert_eq!(replaced.unwrap().id(), first.id());
        assert_eq!(first.state(), WorkerState::Redundant);
        assert_eq!(worker.state(), WorkerState::Active);
        assert_eq!(report.removed, vec!["cutting-machinery-shell-v1".to_string()]);
        assert_eq!(container.controller().unwrap().id(), worker.id());
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_previous_worker() {
        let bed = TestBed::new();
        let container = bed.container();
        let first = activated(&container, script("v1", "v1")).await;
        bed.network.fail("/index.html");

        let outcome = container.register(SCRIPT_URL, script("v2", "v1")).await.unwrap();
        let RegistrationOutcome::InstallFailed { error, active } = outcome else {
            panic!("expected install failure");
        };
        assert!(matches!(error, Error::InstallFailed { .. }));
        assert_eq!(active.unwrap().id(), first.id());
        assert_eq!(first.state(), WorkerState::Active);
        assert_eq!(container.controller().unwrap().id(), first.id());
        assert!(bed.storage.has_cache("cutting-machinery-shell-v1").await.unwrap());
        assert!(!bed.storage.has_cache("cutting-machinery-shell-v2").await.unwrap());
    }

    #[tokio::test]
    async fn restart_resumes_stored_worker_offline() {
        let bed = TestBed::new();
        activated(&bed.container(), script("v1", "v1")).await;
        bed.network.set_offline(true);

        let restarted = bed.container();
        let outcome = restarted.register(SCRIPT_URL, script("v1", "v1")).await.unwrap();
        let RegistrationOutcome::Unchanged(worker) = outcome else {
            panic!("expected the stored worker to resume");
        };
        assert_eq!(worker.state(), WorkerState::Active);
        assert_eq!(restarted.controller().unwrap().id(), worker.id());

        let css = restarted
            .fetch(Request::get(bed.url("/css/main.css")))
            .await
            .unwrap();
        assert_eq!(css.body, Bytes::from_static(b"body of /css/main.css"));
    }

    #[tokio::test]
    async fn restart_does_not_reinstall_unchanged_script() {
        let bed = TestBed::new();
        activated(&bed.container(), script("v1", "v1")).await;
        let fetched = bed.network.requested().len();

        let restarted = bed.container();
        let outcome = restarted.register(SCRIPT_URL, script("v1", "v1")).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Unchanged(_)));
        assert_eq!(bed.network.requested().len(), fetched);
    }

    #[tokio::test]
    async fn failed_upgrade_after_restart_keeps_stored_worker() {
        let bed = TestBed::new();
        activated(&bed.container(), script("v1", "v1")).await;
        bed.network.set_offline(true);

        let restarted = bed.container();
        let outcome = restarted.register(SCRIPT_URL, script("v2", "v1")).await.unwrap();
        let RegistrationOutcome::InstallFailed { active, .. } = outcome else {
            panic!("expected install failure");
        };
        let active = active.unwrap();
        assert_eq!(active.cache_names().shell, "cutting-machinery-shell-v1");
        assert_eq!(restarted.controller().unwrap().id(), active.id());
        let page = restarted.fetch(Request::navigate(bed.url("/"))).await.unwrap();
        assert_eq!(page.body, Bytes::from_static(b"body of /"));
    }

    #[tokio::test]
    async fn restart_reinstalls_when_shell_cache_is_gone() {
        let bed = TestBed::new();
        activated(&bed.container(), script("v1", "v1")).await;
        bed.storage
            .delete_cache("cutting-machinery-shell-v1")
            .await
            .unwrap();

        let restarted = bed.container();
        let outcome = restarted.register(SCRIPT_URL, script("v1", "v1")).await.unwrap();
        assert!(matches!(
            outcome,
            RegistrationOutcome::Activated { replaced: None, .. }
        ));
        assert!(bed.storage.has_cache("cutting-machinery-shell-v1").await.unwrap());
    }

    #[tokio::test]
    async fn upgrade_updates_stored_registration() {
        let bed = TestBed::new();
        let container = bed.container();
        activated(&container, script("v1", "v1")).await;
        let upgraded = activated(&container, script("v2", "v1")).await;

        let record = bed.storage.load_registration(SCRIPT_URL).await.unwrap().unwrap();
        assert_eq!(record.script, *upgraded.script());
        assert_eq!(record.fingerprint, upgraded.script().fingerprint());
    }

    #[tokio::test]
    async fn fetch_without_controller_uses_network() {
        let bed = TestBed::new();
        let container = bed.container();
        let response = container.fetch(Request::get(bed.url("/js/main.js"))).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(bed.storage.cache_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_through_controller_works_offline() {
        let bed = TestBed::new();
        let container = bed.container();
        activated(&container, script("v1", "v1")).await;
        bed.network.set_offline(true);

        let page = container
            .fetch(Request::navigate(bed.url("/")))
            .await
            .unwrap();
        assert_eq!(page.body, Bytes::from_static(b"body of /"));

        let cross = Request::get(Url::parse("https://fonts.example.com/a.woff2").unwrap());
        assert!(matches!(container.fetch(cross).await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn pages_opened_later_are_controlled() {
        let bed = TestBed::new();
        let container = bed.container();
        let worker = activated(&container, script("v1", "v1")).await;

        let (id, _rx) = container.connect("/");
        let info = container.clients().list().into_iter().find(|c| c.id == id).unwrap();
        assert_eq!(info.controller, Some(worker.id()));
    }

    #[tokio::test]
    async fn activation_starts_warm_up_when_configured() {
        let bed = TestBed::new();
        let container = bed.container();
        let (_id, mut rx) = container.connect("/");
        let mut warming = script("v1", "v1");
        warming.config = warming.config.with_warm_on_activate(true);

        let worker = activated(&container, warming).await;
        let progress = recv_until_complete(&mut rx).await;
        assert_eq!(progress, worker.manifest().media.len());
    }

    #[tokio::test]
    async fn posted_command_warms_media() {
        let bed = TestBed::new();
        let container = bed.container();
        assert!(!container.post_message(
            container.connect("/").0,
            r#"{"type":"CACHE_ALL_MEDITATIONS"}"#.to_string()
        ));

        let worker = activated(&container, script("v1", "v1")).await;
        let (id, mut rx) = container.connect("/");
        assert!(container.post_message(id, r#"{"type":"CACHE_ALL_MEDITATIONS"}"#.to_string()));
        let progress = recv_until_complete(&mut rx).await;
        assert_eq!(progress, worker.manifest().media.len());
    }

    #[tokio::test]
    async fn push_and_click_without_worker() {
        let bed = TestBed::new();
        let container = bed.container();
        assert!(container.push(None).await.unwrap().is_none());
        assert!(!container.sync("sync-meditation-data").await.unwrap());

        let notification = Notification {
            title: "t".into(),
            body: "b".into(),
            icon: "i".into(),
            badge: "g".into(),
        };
        container.notification_click(notification).await.unwrap();
        assert_eq!(bed.host.opened(), vec!["/".to_string()]);
    }
}
