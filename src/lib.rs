//! machinery-cache - offline asset caching for The Cutting Machinery.
//!
//! A background cache worker sits between the meditation app's pages and
//! the network. It precaches the app shell on install, evicts stale caches
//! on activation, answers requests cache-first with offline fallbacks, and
//! can download every recording ahead of time.
//!
//! # Example
//!
//! ```no_run
//! use machinery_cache::{AppConfig, RegistrationOutcome, ServiceWorkerContainer, WorkerScript};
//!
//! # async fn example() -> machinery_cache::Result<()> {
//! let config = AppConfig::load()?;
//! let container = ServiceWorkerContainer::from_config(&config)?;
//!
//! let script = WorkerScript::new(config.worker.clone(), config.manifest.clone());
//! if let RegistrationOutcome::Activated { worker, .. } =
//!     container.register(machinery_cache::SCRIPT_URL, script).await?
//! {
//!     println!("worker {} controls {}", worker.id(), container.origin());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod host;
pub mod interceptor;
pub mod lifecycle;
pub mod manifest;
pub mod messages;
pub mod network;
pub mod range;
pub mod registration;
pub mod request;
pub mod stats;
pub mod storage;
pub mod warmup;
pub mod worker;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "server")]
pub mod server;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use cache::{CacheKey, CacheNames, CacheSummary, CachedAsset, NamedCache};
pub use clients::{ClientId, ClientInfo, Clients};
pub use config::{AppConfig, PathConfig, PushConfig, ServerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use host::{Host, LogHost, Notification};
pub use interceptor::{AssetClass, FetchOutcome};
pub use lifecycle::{ActivationReport, WorkerState};
pub use manifest::CacheManifest;
pub use messages::{PageCommand, WorkerMessage};
pub use network::{HttpNetwork, Network};
pub use registration::{RegistrationOutcome, RegistrationRecord, SCRIPT_URL, ServiceWorkerContainer};
pub use request::{Destination, Request, Response, ResponseType};
pub use stats::WarmUpSummary;
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
pub use warmup::CompletionTarget;
pub use worker::{CacheWorker, EventResult, WorkerContext, WorkerEvent, WorkerScript};
