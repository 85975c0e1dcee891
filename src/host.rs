//! OS-level collaborators: notifications and windows.

use async_trait::async_trait;
use serde::Serialize;

use crate::clients::ClientId;
use crate::error::Result;

/// A notification the worker asks the host to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
}

/// Platform services the worker cannot provide itself.
#[async_trait]
pub trait Host: Send + Sync {
    /// Displays a notification.
    async fn show_notification(&self, notification: &Notification) -> Result<()>;

    /// Dismisses a notification after the user clicked it.
    async fn close_notification(&self, notification: &Notification) -> Result<()>;

    /// Brings an open page to the foreground.
    async fn focus_client(&self, id: ClientId) -> Result<()>;

    /// Opens a new app window at `url`.
    async fn open_window(&self, url: &str) -> Result<()>;
}

/// Host for headless runs: every request is logged and reported as done.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHost;

#[async_trait]
impl Host for LogHost {
    async fn show_notification(&self, notification: &Notification) -> Result<()> {
        log::info!(
            "Notification: {} - {} (icon {}, badge {})",
            notification.title,
            notification.body,
            notification.icon,
            notification.badge
        );
        Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> Result<()> {
        log::debug!("Notification closed: {}", notification.title);
        Ok(())
    }

    async fn focus_client(&self, id: ClientId) -> Result<()> {
        log::info!("Focusing client {id}");
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<()> {
        log::info!("Opening window at {url}");
        Ok(())
    }
}
