//! Desktop notification dispatch.
//!
//! Discovery emits events (service discovered, service offline, renames,
//! certificate expiry); the [`NotifyManager`] filters them against the
//! persisted config and hands survivors to a [`Notifier`] backend. The
//! desktop backend uses `notify-rust`; a tracing-based backend exists for
//! headless environments and tests.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use localport_storage::atomic::write_atomic;

use crate::error::{CoreError, Result};

/// A category of notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServiceDiscovered,
    ServiceOffline,
    ServiceRenamed,
    CertExpiring,
}

impl EventType {
    /// Every defined event type.
    pub fn all() -> &'static [EventType] {
        &[
            EventType::ServiceDiscovered,
            EventType::ServiceOffline,
            EventType::ServiceRenamed,
            EventType::CertExpiring,
        ]
    }

    /// The wire name used in `notify.json` and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ServiceDiscovered => "service_discovered",
            EventType::ServiceOffline => "service_offline",
            EventType::ServiceRenamed => "service_renamed",
            EventType::CertExpiring => "cert_expiring",
        }
    }

    /// Parses a wire name.
    pub fn parse(s: &str) -> Option<EventType> {
        EventType::all().iter().copied().find(|e| e.as_str() == s)
    }
}

/// One notification to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub event: EventType,
    pub title: String,
    pub message: String,
    /// URL shown or opened by the backend, when one applies.
    pub url: Option<String>,
}

/// Which events get delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// Per-event overrides; an absent event is enabled.
    #[serde(default)]
    pub event_filter: HashMap<EventType, bool>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_filter: EventType::all().iter().map(|e| (*e, true)).collect(),
        }
    }
}

impl NotifyConfig {
    /// Loads config from `path`; a missing file yields the default.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Persists config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &data, 0o644)?;
        Ok(())
    }

    /// True when `event` passes the filter.
    pub fn allows(&self, event: EventType) -> bool {
        self.enabled && self.event_filter.get(&event).copied().unwrap_or(true)
    }
}

/// A notification delivery backend.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Desktop notifications via the platform notification service.
#[derive(Debug, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        let mut builder = notify_rust::Notification::new();
        builder
            .summary(&notification.title)
            .body(&notification.message)
            .appname("localport");
        builder
            .show()
            .map_err(|e| CoreError::Notify(e.to_string()))?;
        Ok(())
    }
}

/// Backend that writes notifications to the log instead of the desktop.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            event = notification.event.as_str(),
            title = %notification.title,
            message = %notification.message,
            url = notification.url.as_deref().unwrap_or(""),
            "notification"
        );
        Ok(())
    }
}

/// Filters events through the config and dispatches to the backend.
pub struct NotifyManager {
    config: NotifyConfig,
    backend: Box<dyn Notifier>,
}

impl NotifyManager {
    pub fn new(config: NotifyConfig, backend: Box<dyn Notifier>) -> Self {
        Self { config, backend }
    }

    /// Manager using the desktop backend.
    pub fn desktop(config: NotifyConfig) -> Self {
        Self::new(config, Box::new(DesktopNotifier))
    }

    /// Sends a notification if the config allows its event type.
    pub fn notify(&self, notification: Notification) -> Result<()> {
        if !self.config.allows(notification.event) {
            return Ok(());
        }
        self.backend.send(&notification)
    }

    /// Convenience: a new service became reachable.
    pub fn service_discovered(&self, name: &str, port: u16, url: &str) {
        self.dispatch(Notification {
            event: EventType::ServiceDiscovered,
            title: "Service Discovered".to_string(),
            message: format!("{name} is now available on port {port}"),
            url: Some(url.to_string()),
        });
    }

    /// Convenience: a service stopped listening.
    pub fn service_offline(&self, name: &str) {
        self.dispatch(Notification {
            event: EventType::ServiceOffline,
            title: "Service Offline".to_string(),
            message: format!("{name} is no longer available"),
            url: None,
        });
    }

    /// Convenience: a service was renamed.
    pub fn service_renamed(&self, old_name: &str, new_name: &str) {
        self.dispatch(Notification {
            event: EventType::ServiceRenamed,
            title: "Service Renamed".to_string(),
            message: format!("{old_name} has been renamed to {new_name}"),
            url: Some(format!("http://{new_name}")),
        });
    }

    /// Convenience: the intermediate CA is approaching expiry.
    pub fn cert_expiring(&self, days_left: i64) {
        self.dispatch(Notification {
            event: EventType::CertExpiring,
            title: "Certificate Expiring".to_string(),
            message: format!(
                "The intermediate CA expires in {days_left} days; run `localport tls rotate`"
            ),
            url: None,
        });
    }

    fn dispatch(&self, notification: Notification) {
        if let Err(e) = self.notify(notification) {
            tracing::warn!("notification delivery failed: {e}");
        }
    }
}
