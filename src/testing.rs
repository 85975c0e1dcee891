//! Mock collaborators shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{StatusCode, Url};
use tokio::sync::watch;

use crate::clients::{ClientId, Clients};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::host::{Host, Notification};
use crate::manifest::CacheManifest;
use crate::network::Network;
use crate::registration::ServiceWorkerContainer;
use crate::request::{Request, Response, ResponseType};
use crate::storage::MemoryStorage;
use crate::worker::{CacheWorker, WorkerContext, WorkerScript};

pub const ORIGIN: &str = "http://127.0.0.1:8723";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("mp3") => "audio/mpeg",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        _ => "text/html",
    }
}

/// Scriptable network. Same-origin paths answer `body of {path}` unless
/// configured otherwise; cross-origin URLs answer with an opaque response.
pub struct FakeNetwork {
    origin: Url,
    bodies: Mutex<HashMap<String, Bytes>>,
    statuses: Mutex<HashMap<String, StatusCode>>,
    kinds: Mutex<HashMap<String, ResponseType>>,
    failing: Mutex<HashSet<String>>,
    offline: Mutex<bool>,
    requests: Mutex<Vec<Request>>,
    open: watch::Sender<bool>,
}

impl FakeNetwork {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            bodies: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
            kinds: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            offline: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
            open: watch::channel(true).0,
        }
    }

    pub fn serve(&self, path: &str, body: &[u8]) {
        lock(&self.bodies).insert(path.to_string(), Bytes::copy_from_slice(body));
    }

    pub fn serve_status(&self, path: &str, status: StatusCode) {
        lock(&self.statuses).insert(path.to_string(), status);
    }

    /// Answers `path` with a response of the given type, as after a
    /// redirect to another origin.
    pub fn serve_kind(&self, path: &str, kind: ResponseType) {
        lock(&self.kinds).insert(path.to_string(), kind);
    }

    pub fn fail(&self, path: &str) {
        lock(&self.failing).insert(path.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }

    /// Holds every fetch until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.open.send_replace(false);
    }

    pub fn resume(&self) {
        self.open.send_replace(true);
    }

    /// Paths of every request seen, in arrival order.
    pub fn requested(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }

    pub fn last_request(&self) -> Option<Request> {
        lock(&self.requests).last().cloned()
    }

    /// A complete same-origin audio response.
    pub fn body_response(&self, body: &[u8]) -> Response {
        Response::new(StatusCode::OK, Bytes::copy_from_slice(body))
            .with_kind(ResponseType::Basic)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"))
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        lock(&self.requests).push(request.clone());
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        let url = &request.url;
        let path = url.path();
        if *lock(&self.offline) || lock(&self.failing).contains(path) {
            return Err(Error::Network(format!("unreachable: {url}")));
        }
        if url.origin() != self.origin.origin() {
            return Ok(Response::new(StatusCode::OK, "").with_kind(ResponseType::Opaque));
        }
        if let Some(status) = lock(&self.statuses).get(path) {
            return Ok(Response::new(*status, "").with_kind(ResponseType::Basic));
        }
        let body = lock(&self.bodies)
            .get(path)
            .cloned()
            .unwrap_or_else(|| Bytes::from(format!("body of {path}")));
        let kind = lock(&self.kinds)
            .get(path)
            .copied()
            .unwrap_or(ResponseType::Basic);
        Ok(Response::new(StatusCode::OK, body)
            .with_kind(kind)
            .with_header(CONTENT_TYPE, HeaderValue::from_static(content_type_for(path))))
    }
}

/// Host that records every request.
#[derive(Default)]
pub struct RecordingHost {
    notifications: Mutex<Vec<Notification>>,
    closed: Mutex<usize>,
    focused: Mutex<Vec<ClientId>>,
    opened: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn closed(&self) -> usize {
        *lock(&self.closed)
    }

    pub fn focused(&self) -> Vec<ClientId> {
        lock(&self.focused).clone()
    }

    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl Host for RecordingHost {
    async fn show_notification(&self, notification: &Notification) -> Result<()> {
        lock(&self.notifications).push(notification.clone());
        Ok(())
    }

    async fn close_notification(&self, _notification: &Notification) -> Result<()> {
        *lock(&self.closed) += 1;
        Ok(())
    }

    async fn focus_client(&self, id: ClientId) -> Result<()> {
        lock(&self.focused).push(id);
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<()> {
        lock(&self.opened).push(url.to_string());
        Ok(())
    }
}

/// Shared collaborators for one test.
pub struct TestBed {
    pub storage: Arc<MemoryStorage>,
    pub network: Arc<FakeNetwork>,
    pub clients: Arc<Clients>,
    pub host: Arc<RecordingHost>,
    origin: Url,
    next_id: AtomicU64,
}

impl TestBed {
    pub fn new() -> Self {
        let origin = Url::parse(ORIGIN).unwrap();
        let network = FakeNetwork::new(origin.clone());
        network.serve("/offline.html", b"offline page");
        Self {
            storage: Arc::new(MemoryStorage::new()),
            network: Arc::new(network),
            clients: Arc::new(Clients::new()),
            host: Arc::new(RecordingHost::default()),
            origin,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self, path: &str) -> Url {
        self.origin.join(path).unwrap()
    }

    pub fn context(&self) -> WorkerContext {
        WorkerContext {
            storage: self.storage.clone(),
            network: self.network.clone(),
            clients: Arc::clone(&self.clients),
            host: self.host.clone(),
        }
    }

    pub fn worker(&self, script: WorkerScript) -> Arc<CacheWorker> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Arc::new(CacheWorker::new(
            id,
            script,
            self.origin.clone(),
            self.context(),
        ))
    }

    pub fn container(&self) -> ServiceWorkerContainer {
        ServiceWorkerContainer::new(self.origin.clone(), self.context())
    }
}

/// A small worker script; warm-up on activation is off so tests control it.
pub fn script(shell_version: &str, media_version: &str) -> WorkerScript {
    let manifest = CacheManifest::new(
        ["/", "/index.html", "/css/main.css", "/offline.html", "/manifest.json"]
            .map(String::from)
            .to_vec(),
        ["/assets/a.mp3", "/assets/b.mp3", "/assets/c.mp3"]
            .map(String::from)
            .to_vec(),
        "/offline.html",
    );
    let config = WorkerConfig::new()
        .with_shell_version(shell_version)
        .with_media_version(media_version)
        .with_warm_on_activate(false);
    WorkerScript::new(config, manifest)
}
