//! User-facing notifications
//!
//! Sync failures are announced once per exhausted retry sequence. Offline
//! state is also kept as a flag so it can be shown for as long as it lasts.

use log::{info, warn};
use tokio::sync::{broadcast, watch};

/// A notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A query gave up after its retries.
    SyncFailed { key: String, message: String },
    /// Connectivity lost.
    Offline,
    /// Connectivity restored. Sent before the recovery refresh resolves.
    BackOnline,
}

/// Broadcast hub for [`Notice`]s plus the persistent offline flag.
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
    offline: watch::Sender<bool>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (offline, _) = watch::channel(false);
        Self { tx, offline }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Publish a notice. Having no listeners is not an error.
    pub fn notify(&self, notice: Notice) {
        match &notice {
            Notice::SyncFailed { key, message } => warn!("Sync failed for {}: {}", key, message),
            Notice::Offline => info!("Connection lost"),
            Notice::BackOnline => info!("Back online"),
        }
        let _ = self.tx.send(notice);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.send_replace(offline);
    }

    pub fn is_offline(&self) -> bool {
        *self.offline.borrow()
    }

    pub fn watch_offline(&self) -> watch::Receiver<bool> {
        self.offline.subscribe()
    }
}
