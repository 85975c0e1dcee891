//! Pages connected to the worker.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::WorkerMessage;

/// Identifies one open page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Snapshot of a connected page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: String,
    pub focused: bool,
    /// Id of the worker currently controlling this page.
    pub controller: Option<u64>,
}

struct ClientEntry {
    info: ClientInfo,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

/// Registry of open pages, in connection order.
///
/// Shared by every worker version so a newly activated worker can claim the
/// pages its predecessor controlled.
#[derive(Default)]
pub struct Clients {
    entries: Mutex<Vec<ClientEntry>>,
}

impl Clients {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ClientEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a page and returns the channel its worker messages arrive on.
    pub fn connect(&self, url: &str) -> (ClientId, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();
        self.lock().push(ClientEntry {
            info: ClientInfo {
                id,
                url: url.to_string(),
                focused: false,
                controller: None,
            },
            tx,
        });
        log::debug!("Client {id} connected from {url}");
        (id, rx)
    }

    /// Removes a page.
    pub fn disconnect(&self, id: ClientId) {
        self.lock().retain(|entry| entry.info.id != id);
        log::debug!("Client {id} disconnected");
    }

    /// Posts a message to one page. Returns false if the page is gone.
    pub fn post(&self, id: ClientId, message: WorkerMessage) -> bool {
        let mut entries = self.lock();
        let Some(index) = entries.iter().position(|entry| entry.info.id == id) else {
            return false;
        };
        if entries[index].tx.send(message).is_ok() {
            true
        } else {
            entries.remove(index);
            false
        }
    }

    /// Posts a message to every page, pruning pages whose receiver was dropped.
    /// Returns the number of pages reached.
    pub fn broadcast(&self, message: &WorkerMessage) -> usize {
        let mut entries = self.lock();
        entries.retain(|entry| entry.tx.send(message.clone()).is_ok());
        entries.len()
    }

    /// Returns the oldest connected page.
    #[must_use]
    pub fn first(&self) -> Option<ClientId> {
        self.lock().first().map(|entry| entry.info.id)
    }

    /// Makes `worker_id` the controller of every open page.
    pub fn claim(&self, worker_id: u64) -> usize {
        let mut entries = self.lock();
        for entry in entries.iter_mut() {
            entry.info.controller = Some(worker_id);
        }
        entries.len()
    }

    /// Makes `worker_id` the controller of one page.
    pub fn control(&self, id: ClientId, worker_id: u64) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.iter_mut().find(|entry| entry.info.id == id) else {
            return false;
        };
        entry.info.controller = Some(worker_id);
        true
    }

    /// Marks one page as focused and every other page as not focused.
    pub fn focus(&self, id: ClientId) -> bool {
        let mut found = false;
        for entry in self.lock().iter_mut() {
            entry.info.focused = entry.info.id == id;
            found |= entry.info.focused;
        }
        found
    }

    /// Returns a snapshot of every open page.
    #[must_use]
    pub fn list(&self) -> Vec<ClientInfo> {
        self.lock().iter().map(|entry| entry.info.clone()).collect()
    }

    /// Number of open pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no page is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
