//! Durable session cache
//!
//! Holds at most one active session in two string keys: the JSON payload and
//! its expiry stamp (epoch milliseconds). Every authenticated access pushes
//! the expiry forward; it never moves backwards.

use std::marker::PhantomData;
use std::time::Duration;

use log::{debug, warn};
use serde::{Serialize, de::DeserializeOwned};

use crate::cache::{CacheTtl, TtlBackend, TtlCache};
use crate::clock::duration_ms;
use crate::error::Result;

/// Key holding the serialized session payload
pub const PAYLOAD_KEY: &str = "session.payload";

/// Key holding the session expiry as a decimal epoch-millisecond string
pub const EXPIRY_KEY: &str = "session.expires_at";

/// A loaded session and when it expires.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord<P> {
    pub payload: P,
    pub expires_at_ms: i64,
}

/// Single-slot session cache over a [`TtlCache`].
pub struct SessionCache<P, B: TtlBackend> {
    cache: TtlCache<B>,
    ttl: Duration,
    _payload: PhantomData<fn() -> P>,
}

impl<P, B> SessionCache<P, B>
where
    P: Serialize + DeserializeOwned,
    B: TtlBackend,
{
    pub fn new(cache: TtlCache<B>) -> Self {
        Self {
            cache,
            ttl: CacheTtl::SESSION,
            _payload: PhantomData,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace the active session.
    pub fn store(&self, payload: &P) -> Result<i64> {
        let expires_at = self.cache.now_ms().saturating_add(duration_ms(self.ttl));
        let payload_json = serde_json::to_string(payload)?;

        let backend_ttl = Some(self.backend_ttl(expires_at));
        self.cache.put(PAYLOAD_KEY, &payload_json, backend_ttl)?;
        self.cache.put(EXPIRY_KEY, &expires_at.to_string(), backend_ttl)?;

        debug!("Stored session, expires at {}", expires_at);
        Ok(expires_at)
    }

    /// Read the session without extending it.
    ///
    /// Expired or unreadable sessions are evicted and reported as absent.
    pub fn peek(&self) -> Option<SessionRecord<P>> {
        let expires_at_ms = self.read_expiry()?;

        if self.cache.now_ms() > expires_at_ms {
            debug!("Session expired at {}", expires_at_ms);
            self.clear();
            return None;
        }

        let Some(payload_json) = self.cache.get::<String>(PAYLOAD_KEY) else {
            self.clear();
            return None;
        };

        match serde_json::from_str::<P>(&payload_json) {
            Ok(payload) => Some(SessionRecord {
                payload,
                expires_at_ms,
            }),
            Err(e) => {
                warn!("Evicting corrupt session payload: {}", e);
                self.clear();
                None
            }
        }
    }

    /// Read the session for an authenticated access, extending its TTL.
    pub fn load(&self) -> Option<SessionRecord<P>> {
        let mut record = self.peek()?;
        if let Some(expires_at) = self.extend() {
            record.expires_at_ms = expires_at;
        }
        Some(record)
    }

    /// Extend the active session. Returns false when there is none.
    pub fn refresh(&self) -> bool {
        self.peek().is_some() && self.extend().is_some()
    }

    /// Expiry of the active session, if any.
    pub fn expires_at_ms(&self) -> Option<i64> {
        self.peek().map(|record| record.expires_at_ms)
    }

    /// Drop the active session.
    pub fn clear(&self) {
        self.cache.clear(PAYLOAD_KEY);
        self.cache.clear(EXPIRY_KEY);
    }

    fn read_expiry(&self) -> Option<i64> {
        let raw = self.cache.get::<String>(EXPIRY_KEY)?;
        match raw.parse::<i64>() {
            Ok(ms) => Some(ms),
            Err(e) => {
                warn!("Evicting corrupt session expiry '{}': {}", raw, e);
                self.clear();
                None
            }
        }
    }

    fn extend(&self) -> Option<i64> {
        let current = self.read_expiry()?;
        let candidate = self.cache.now_ms().saturating_add(duration_ms(self.ttl));
        let expires_at = candidate.max(current);

        let backend_ttl = Some(self.backend_ttl(expires_at));
        if let Err(e) = self.cache.put(EXPIRY_KEY, &expires_at.to_string(), backend_ttl) {
            warn!("Failed to extend session: {}", e);
            return None;
        }
        self.cache.touch(PAYLOAD_KEY, backend_ttl);
        Some(expires_at)
    }

    /// Backend lifetime for both keys: time left until `expires_at_ms` plus
    /// one TTL of slack, so neither key is dropped before the stamp says so.
    fn backend_ttl(&self, expires_at_ms: i64) -> Duration {
        let remaining = expires_at_ms.saturating_sub(self.cache.now_ms()).max(0);
        Duration::from_millis(remaining as u64).saturating_add(self.ttl)
    }
}
