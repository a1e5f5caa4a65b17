//! Generic expiring key/value cache
//!
//! Expiry is lazy: an expired entry is evicted by the `get` that finds it,
//! no background sweep runs. Backends only store bytes and expiry stamps.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use serde::{Serialize, de::DeserializeOwned};

use super::CacheTtl;
use super::storage::CacheStats;
use crate::clock::{SharedClock, duration_ms};
use crate::error::CacheError;

type Result<T> = std::result::Result<T, CacheError>;

/// Raw entry as held by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub data: Vec<u8>,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Storage backend for [`TtlCache`].
pub trait TtlBackend: Send + Sync {
    /// Read an entry regardless of expiry.
    fn read(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Insert or replace an entry.
    fn write(&self, key: &str, entry: &StoredEntry) -> Result<()>;

    /// Change an existing entry's expiry. Returns false if the key is absent.
    fn set_expiry(&self, key: &str, expires_at_ms: i64) -> Result<bool>;

    /// Remove an entry. Returns true if something was removed.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Remove every entry, returning how many were removed.
    fn remove_all(&self) -> Result<usize>;

    /// Remove entries whose expiry is before `now_ms`.
    fn purge_expired(&self, now_ms: i64) -> Result<usize>;

    fn stats(&self, now_ms: i64) -> Result<CacheStats>;
}

/// Lets the backend be picked at runtime.
impl<B: TtlBackend + ?Sized> TtlBackend for Box<B> {
    fn read(&self, key: &str) -> Result<Option<StoredEntry>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        (**self).write(key, entry)
    }

    fn set_expiry(&self, key: &str, expires_at_ms: i64) -> Result<bool> {
        (**self).set_expiry(key, expires_at_ms)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        (**self).remove(key)
    }

    fn remove_all(&self) -> Result<usize> {
        (**self).remove_all()
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        (**self).purge_expired(now_ms)
    }

    fn stats(&self, now_ms: i64) -> Result<CacheStats> {
        (**self).stats(now_ms)
    }
}

/// Process-local backend. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredEntry>>> {
        self.entries
            .lock()
            .map_err(|e| CacheError::Io(format!("Lock poisoned: {}", e)))
    }
}

impl TtlBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<StoredEntry>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn write(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        self.lock()?.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn set_expiry(&self, key: &str, expires_at_ms: i64) -> Result<bool> {
        match self.lock()?.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = expires_at_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn remove_all(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at_ms >= now_ms);
        Ok(before - entries.len())
    }

    fn stats(&self, now_ms: i64) -> Result<CacheStats> {
        let entries = self.lock()?;
        let valid: Vec<&StoredEntry> = entries
            .values()
            .filter(|e| e.expires_at_ms >= now_ms)
            .collect();

        Ok(CacheStats {
            total_entries: entries.len(),
            valid_entries: valid.len(),
            expired_entries: entries.len() - valid.len(),
            total_size_bytes: entries.values().map(|e| e.data.len()).sum(),
            oldest_entry: valid.iter().map(|e| e.created_at_ms).min(),
            newest_entry: valid.iter().map(|e| e.created_at_ms).max(),
        })
    }
}

/// Expiring key/value cache over a [`TtlBackend`].
///
/// Built explicitly and shared by the caller; there is no global instance.
pub struct TtlCache<B: TtlBackend> {
    backend: B,
    clock: SharedClock,
    default_ttl: Duration,
}

impl<B: TtlBackend> TtlCache<B> {
    pub fn new(backend: B, clock: SharedClock) -> Self {
        Self {
            backend,
            clock,
            default_ttl: CacheTtl::DEFAULT,
        }
    }

    /// Override the TTL used when a call passes `None`.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Store a value, replacing any previous one.
    pub fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), crate::error::Error> {
        let data = serde_json::to_vec(value)?;
        self.put_raw(key, data, ttl)?;
        Ok(())
    }

    /// Store pre-serialized bytes.
    pub fn put_raw(&self, key: &str, data: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = self.now_ms();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = StoredEntry {
            data,
            created_at_ms: now,
            expires_at_ms: now.saturating_add(duration_ms(ttl)),
        };
        self.backend.write(key, &entry)
    }

    /// Get a live value.
    ///
    /// Expired and undecodable entries are evicted and reported as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.get_raw(key)?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Evicting corrupt cache entry {}: {}", key, e);
                let _ = self.backend.remove(key);
                None
            }
        }
    }

    /// Get the raw bytes of a live entry.
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.live_entry(key).map(|entry| entry.data)
    }

    /// Expiry stamp of a live entry.
    pub fn expires_at_ms(&self, key: &str) -> Option<i64> {
        self.live_entry(key).map(|entry| entry.expires_at_ms)
    }

    fn live_entry(&self, key: &str) -> Option<StoredEntry> {
        let entry = match self.backend.read(key) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        if self.now_ms() > entry.expires_at_ms {
            debug!("Cache entry expired: {}", key);
            let _ = self.backend.remove(key);
            return None;
        }

        Some(entry)
    }

    /// Extend a live entry's expiry without touching its value.
    ///
    /// Never creates an entry and never moves expiry backwards.
    pub fn touch(&self, key: &str, ttl: Option<Duration>) -> bool {
        let Some(entry) = self.live_entry(key) else {
            return false;
        };

        let ttl = ttl.unwrap_or(self.default_ttl);
        let candidate = self.now_ms().saturating_add(duration_ms(ttl));
        let expires_at = candidate.max(entry.expires_at_ms);

        self.backend.set_expiry(key, expires_at).unwrap_or_else(|e| {
            warn!("Cache touch failed for {}: {}", key, e);
            false
        })
    }

    /// Remove one entry.
    pub fn clear(&self, key: &str) -> bool {
        self.backend.remove(key).unwrap_or(false)
    }

    /// Remove every entry.
    pub fn clear_all(&self) -> Result<usize> {
        self.backend.remove_all()
    }

    /// Drop expired entries in bulk.
    pub fn purge_expired(&self) -> Result<usize> {
        self.backend.purge_expired(self.now_ms())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        self.backend.stats(self.now_ms())
    }
}
