//! Local caches for session data and sync payloads
//!
//! Provides a generic expiring key/value cache ([`TtlCache`]) over either an
//! in-memory map or SQLite storage with file blobs for large values.

pub mod key;
pub mod storage;
pub mod ttl;

use std::time::Duration;

/// Default TTLs per cached data type
pub struct CacheTtl;

impl CacheTtl {
    /// Fallback TTL when a cache is built without one
    pub const DEFAULT: Duration = Duration::from_secs(5 * 60); // 5 min

    /// Authenticated session blob, extended on every authenticated access
    pub const SESSION: Duration = Duration::from_secs(5 * 60); // 5 min

    /// Window in which identical payloads are reported as unchanged
    pub const STABILIZER_WINDOW: Duration = Duration::from_secs(5); // 5 sec
}

pub use key::{cache_key, content_hash};
pub use storage::{CacheStats, CacheStorage};
pub use ttl::{MemoryBackend, StoredEntry, TtlBackend, TtlCache};
