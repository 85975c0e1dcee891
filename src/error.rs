//! Error types for the machinery-cache library.

use thiserror::Error;

use crate::lifecycle::WorkerState;

/// Errors that can occur while running the cache worker.
#[derive(Error, Debug)]
pub enum Error {
    /// A network fetch could not be completed (connectivity, DNS, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The shell precache batch failed, so the new worker never activates.
    #[error("Install failed for {url}: {reason}")]
    InstallFailed {
        /// URL of the shell asset that could not be precached.
        url: String,
        /// Why the asset was rejected.
        reason: String,
    },

    /// A lifecycle operation was attempted from the wrong state.
    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        /// The state the operation requires.
        expected: WorkerState,
        /// The state the worker is actually in.
        actual: WorkerState,
    },

    /// The cache storage rejected an operation.
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// An incoming request could not be turned into a worker request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error during storage operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization failed.
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// A specialized `Result` type for machinery-cache operations.
pub type Result<T> = std::result::Result<T, Error>;
