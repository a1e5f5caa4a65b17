//! Synced data layer
//!
//! [`SyncedQuery`] keeps one remote query fresh: polling, focus and
//! reconnect refetches, retries, single-flight fetches and change
//! suppression. [`reconcile`] and [`channel`] patch the loaded collection
//! from realtime change events.

pub mod channel;
pub mod query;
pub mod reconcile;
pub mod retry;
pub mod scheduler;

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::notify::Notifier;
use crate::stabilizer::DataStabilizer;

pub use channel::{ChangePublisher, ChangeSubscriber, change_channel, spawn_reconciler};
pub use query::{FreshnessState, QueryOptions, QuerySnapshot, RefreshTrigger, SyncedQuery};
pub use reconcile::{ChangeEvent, ChangePayload, Collection, Record, apply_changes, split_batches};
pub use retry::RetryPolicy;
pub use scheduler::PollHandle;

/// Services shared by every query of an application instance.
#[derive(Clone)]
pub struct SyncContext {
    pub stabilizer: Arc<DataStabilizer>,
    pub notifier: Arc<Notifier>,
    pub clock: SharedClock,
}

impl SyncContext {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            stabilizer: Arc::new(DataStabilizer::new(clock.clone())),
            notifier: Arc::new(Notifier::default()),
            clock,
        }
    }

    pub fn with_stabilizer(mut self, stabilizer: DataStabilizer) -> Self {
        self.stabilizer = Arc::new(stabilizer);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}
