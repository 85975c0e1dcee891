//! Messages exchanged between pages and the worker.
//!
//! Both directions are JSON objects tagged by a `type` field. Pages may send
//! anything; only recognised commands are acted upon.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Commands a page can send to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageCommand {
    /// Eagerly fetch every recording into the media cache.
    CacheAllMeditations,
}

impl PageCommand {
    /// Parses a page message, returning `None` for anything unrecognised.
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        match serde_json::from_str(data) {
            Ok(command) => Some(command),
            Err(e) => {
                log::debug!("Ignoring page message {data:?}: {e}");
                None
            }
        }
    }
}

/// Events the worker posts to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// One media asset finished during warm-up (cached, already present, or failed).
    CacheProgress {
        url: String,
        completed: usize,
        total: usize,
    },
    /// The warm-up pass finished.
    CacheComplete,
    /// A background sync resolved.
    SyncComplete,
}

impl WorkerMessage {
    /// Serializes the message for the page channel.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
