//! Change detection for incoming payloads
//!
//! [`DataStabilizer`] remembers a content hash per logical key and reports
//! whether a new payload differs from the last one seen inside its window.
//! Repeated pushes of the same data then stop propagating to subscribers.

pub mod rate;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{trace, warn};
use serde::Serialize;

use crate::cache::{CacheTtl, content_hash};
use crate::clock::{SharedClock, duration_ms};

pub use rate::{Debouncer, Throttle};

/// Last observed payload for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub hash: String,
    pub stored_at_ms: i64,
}

/// Hash-based change detector.
///
/// `has_changed` is atomic on its own; a check followed by an action is not.
pub struct DataStabilizer {
    entries: Mutex<HashMap<String, CacheEntry<serde_json::Value>>>,
    window: Duration,
    clock: SharedClock,
}

impl DataStabilizer {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            window: CacheTtl::STABILIZER_WINDOW,
            clock,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Report whether `value` differs from the last payload seen for `key`.
    ///
    /// The first observation, an expired entry, or a different hash all
    /// report `true` and reseed the entry. A payload that cannot be
    /// serialized is always treated as changed.
    pub fn has_changed<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let canonical = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("Cannot hash payload for {}: {}", key, e);
                return true;
            }
        };
        let hash = match content_hash(&canonical) {
            Ok(h) => h,
            Err(e) => {
                warn!("Cannot hash payload for {}: {}", key, e);
                return true;
            }
        };

        let now = self.clock.now_ms();
        let mut entries = self.lock();

        if let Some(existing) = entries.get(key) {
            let fresh = now - existing.stored_at_ms <= duration_ms(self.window);
            if fresh && existing.hash == hash {
                trace!("Payload unchanged for {}", key);
                return false;
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value: canonical,
                hash,
                stored_at_ms: now,
            },
        );
        true
    }

    /// Last payload recorded for `key`, if still inside the window.
    pub fn cached(&self, key: &str) -> Option<CacheEntry<serde_json::Value>> {
        let now = self.clock.now_ms();
        self.lock()
            .get(key)
            .filter(|e| now - e.stored_at_ms <= duration_ms(self.window))
            .cloned()
    }

    /// Force the next observation of `key` to report a change.
    pub fn clear_cache(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Force the next observation of every key to report a change.
    pub fn clear_all_cache(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<serde_json::Value>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
