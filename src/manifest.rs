//! The static list of URLs each cache is responsible for.

use std::collections::HashSet;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Path of the document returned for navigations that fail offline.
pub const OFFLINE_PAGE: &str = "/offline.html";

const SHELL_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/css/main.css",
    "/js/main.js",
    OFFLINE_PAGE,
    "/manifest.json",
    "/assets/logo.png",
];

const MEDIA_ASSETS: &[&str] = &[
    "/assets/Hour.mp3",
    "/assets/01-App-Intro.mp3",
    "/assets/02-Pre-Flight.mp3",
    "/assets/03-Posture.mp3",
    "/assets/04-Whats-It-All-For.mp3",
    "/assets/05-How-to-Meditate.mp3",
    "/assets/06-Why-these-Phases.mp3",
    "/assets/07-Vinay-and-Lineage.mp3",
    "/assets/08-Bad-Session-Guide.mp3",
    "/assets/09-Progress-Guide.mp3",
    "/assets/10-Cant-Meditate.mp3",
    "/assets/42-Nothings-Happening.mp3",
    "/assets/43-Sync-and-Magic.mp3",
    "/assets/44-Depression-and-Anger.mp3",
    "/assets/45-Reality-and-Meta.mp3",
    "/assets/46-Fun-Stuff.mp3",
    "/assets/00-Instruction-1-1.mp3",
    "/assets/00-Instruction-1-2.mp3",
    "/assets/00-Instruction-1-3.mp3",
    "/assets/00-Instruction-2-1.mp3",
    "/assets/00-Instruction-2-2.mp3",
    "/assets/00-Instruction-2-3.mp3",
    "/assets/00-Cooldown.mp3",
    "/assets/00-Instruction-Sprite.mp3",
];

/// Root-relative URLs belonging to the shell and media caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheManifest {
    /// Minimal set of resources needed to render the app with no network.
    pub shell: Vec<String>,
    /// Every playable recording.
    pub media: Vec<String>,
    /// Document served for failed navigations. Must be part of `shell`.
    pub offline_page: String,
}

impl Default for CacheManifest {
    fn default() -> Self {
        Self {
            shell: SHELL_ASSETS.iter().map(ToString::to_string).collect(),
            media: MEDIA_ASSETS.iter().map(ToString::to_string).collect(),
            offline_page: OFFLINE_PAGE.to_string(),
        }
    }
}

impl CacheManifest {
    /// Creates a manifest from explicit lists.
    #[must_use]
    pub fn new(shell: Vec<String>, media: Vec<String>, offline_page: impl Into<String>) -> Self {
        Self {
            shell,
            media,
            offline_page: offline_page.into(),
        }
    }

    /// Checks the manifest invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a path is not root-relative, appears
    /// twice, or the offline page is missing from the shell list.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for path in self.shell.iter().chain(&self.media) {
            if !path.starts_with('/') {
                return Err(Error::Config(format!("manifest path {path:?} is not root-relative")));
            }
            if !seen.insert(path.as_str()) {
                return Err(Error::Config(format!("manifest path {path} is listed twice")));
            }
        }
        if !self.shell.contains(&self.offline_page) {
            return Err(Error::Config(format!(
                "offline page {} is not in the shell manifest",
                self.offline_page
            )));
        }
        Ok(())
    }

    /// Returns true if `path` names a media asset.
    #[must_use]
    pub fn is_media_path(&self, path: &str) -> bool {
        self.media.iter().any(|m| m == path)
    }

    /// Resolves the shell list against `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if a path cannot be joined onto the origin.
    pub fn shell_urls(&self, origin: &Url) -> Result<Vec<Url>> {
        resolve_all(origin, &self.shell)
    }

    /// Resolves the media list against `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if a path cannot be joined onto the origin.
    pub fn media_urls(&self, origin: &Url) -> Result<Vec<Url>> {
        resolve_all(origin, &self.media)
    }

    /// Resolves the offline page against `origin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be joined onto the origin.
    pub fn offline_url(&self, origin: &Url) -> Result<Url> {
        resolve(origin, &self.offline_page)
    }
}

fn resolve(origin: &Url, path: &str) -> Result<Url> {
    origin
        .join(path)
        .map_err(|e| Error::Config(format!("cannot resolve {path} against {origin}: {e}")))
}

fn resolve_all(origin: &Url, paths: &[String]) -> Result<Vec<Url>> {
    paths.iter().map(|p| resolve(origin, p)).collect()
}
