//! Configuration types for the cache worker and its host process.

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::CacheManifest;

/// Notification shown when a push message arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub title: String,
    pub icon: String,
    pub badge: String,
    /// Body used when the push carries no payload.
    pub default_body: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            title: "The Cutting Machinery".to_string(),
            icon: "/assets/icons/icon-192x192.png".to_string(),
            badge: "/assets/icons/badge-72x72.png".to_string(),
            default_body: "Time for your meditation practice".to_string(),
        }
    }
}

/// Versioning and behaviour of the cache worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Common prefix of every cache name.
    pub cache_prefix: String,
    /// Bump to invalidate shell assets.
    pub shell_version: String,
    /// Bump only when published recordings change.
    pub media_version: String,
    /// Start a warm-up pass as soon as a new worker activates.
    pub warm_on_activate: bool,
    /// Maximum concurrent fetches during warm-up. 0 fetches everything at once.
    pub warmup_concurrency: usize,
    /// Background-sync tag the worker answers with `SYNC_COMPLETE`.
    pub sync_tag: String,
    pub push: PushConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "cutting-machinery".to_string(),
            shell_version: "v1".to_string(),
            media_version: "v1".to_string(),
            warm_on_activate: true,
            warmup_concurrency: 0,
            sync_tag: "sync-meditation-data".to_string(),
            push: PushConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shell cache version.
    #[must_use]
    pub fn with_shell_version(mut self, version: impl Into<String>) -> Self {
        self.shell_version = version.into();
        self
    }

    /// Sets the media cache version.
    #[must_use]
    pub fn with_media_version(mut self, version: impl Into<String>) -> Self {
        self.media_version = version.into();
        self
    }

    /// Sets whether activation triggers a warm-up pass.
    #[must_use]
    pub const fn with_warm_on_activate(mut self, warm: bool) -> Self {
        self.warm_on_activate = warm;
        self
    }

    /// Sets the warm-up fetch concurrency.
    #[must_use]
    pub const fn with_warmup_concurrency(mut self, concurrency: usize) -> Self {
        self.warmup_concurrency = concurrency;
        self
    }

    /// Resolves the effective concurrency for a pass over `total` assets.
    #[must_use]
    pub fn effective_concurrency(&self, total: usize) -> usize {
        if self.warmup_concurrency == 0 {
            total.max(1)
        } else {
            self.warmup_concurrency
        }
    }
}

/// Directories used by the host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root of the durable cache storage.
    pub cache_dir: PathBuf,
    /// Directory where `config.toml` is read from.
    pub config_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            cache_dir: data_dir.join("machinery-cache").join("caches"),
            config_dir: config_dir.join("machinery-cache"),
        }
    }
}

/// HTTP front configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origin the static app is published on.
    pub upstream: String,
    /// Seconds to wait for a TCP connection to the upstream.
    pub connect_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8723,
            upstream: "http://127.0.0.1:8080".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// The origin pages see; every same-origin request goes through the worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if host and port do not form a valid URL.
    pub fn origin(&self) -> Result<Url> {
        let raw = format!("http://{}:{}", self.host, self.port);
        Url::parse(&raw).map_err(|e| Error::Config(format!("invalid origin {raw}: {e}")))
    }

    /// The upstream origin the network is reached through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `upstream` is not a valid URL.
    pub fn upstream_url(&self) -> Result<Url> {
        Url::parse(&self.upstream)
            .map_err(|e| Error::Config(format!("invalid upstream {}: {e}", self.upstream)))
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub manifest: CacheManifest,
    pub server: ServerConfig,
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.server.host = host.into();
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Sets the upstream origin.
    #[must_use]
    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.server.upstream = upstream.into();
        self
    }

    /// Sets the cache storage directory.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.paths.cache_dir = dir.into();
        self
    }

    /// Loads `config.toml` from the default config directory if it exists,
    /// then applies `MACHINERY_UPSTREAM` and `MACHINERY_PORT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        let path = PathConfig::default().config_dir.join("config.toml");
        let mut config = if path.exists() {
            log::info!("Loading config from {}", path.display());
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.manifest.validate()?;
        Ok(config)
    }

    /// Parses a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(upstream) = var("MACHINERY_UPSTREAM") {
            self.server.upstream = upstream;
        }
        if let Some(port) = var("MACHINERY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("MACHINERY_PORT is not a port: {port}")))?;
        }
        Ok(())
    }
}
