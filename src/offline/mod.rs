//! Offline cache for outbound requests
//!
//! Precaches a manifest of core assets per deployed version, answers reads
//! from the network while storing copies, and falls back to the stored copy
//! when the network fails. Versions move through install, an optional wait,
//! and activation, which deletes every other version's bucket.

pub mod fetcher;
pub mod store;

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::try_join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::client::ApiResult;
use crate::error::{ApiError, Result};

pub use fetcher::{Fetcher, HttpFetcher, HttpRequest, HttpResponse};
pub use store::{MemoryResponseStore, ResponseStore, SqliteResponseStore};

/// Prefix of every bucket this cache owns
pub const BUCKET_PREFIX: &str = "pulsesync-";

const ACTIVE_MARKER: &str = "active";
const WAITING_MARKER: &str = "waiting";

/// Only successful responses are stored
const CACHEABLE_STATUS: u16 = 200;

/// Bucket name for a version tag.
pub fn bucket_name(version: &str) -> String {
    format!("{}{}", BUCKET_PREFIX, version)
}

/// Offline cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Base URL that relative manifest paths resolve against
    pub origin: String,
    /// Version tag of the current deployment
    pub version: String,
    /// Core assets stored at install time
    pub precache: Vec<String>,
    /// Requests whose path contains any of these go straight to the network
    pub exclude: Vec<String>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            version: "v1".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
            ],
            exclude: vec![
                "/rest/".to_string(),
                "/auth/".to_string(),
                "/realtime/".to_string(),
            ],
        }
    }
}

impl OfflineConfig {
    /// Resolve a manifest entry against the origin.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.origin.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// URL of the root document used as the navigation fallback.
    pub fn root_url(&self) -> String {
        self.resolve("/")
    }

    fn is_excluded(&self, request: &HttpRequest) -> bool {
        let path = request.path();
        self.exclude.iter().any(|pattern| path.contains(pattern.as_str()))
    }
}

/// Version lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "version", rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing installed
    Idle,
    Installing(String),
    /// Installed while another version is active
    Waiting(String),
    Activating(String),
    Active(String),
}

/// Messages from the host page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting version now
    SkipWaiting,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Not intercepted
    Passthrough,
    Network,
    Cache,
    /// Root document served for a failed navigation
    OfflineFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub response: HttpResponse,
    pub source: ResponseSource,
}

/// Summary for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineStatus {
    pub state: LifecycleState,
    pub active: Option<String>,
    pub waiting: Option<String>,
    /// (bucket, stored responses)
    pub buckets: Vec<(String, usize)>,
}

struct Lifecycle {
    phase: LifecycleState,
    active: Option<String>,
    waiting: Option<String>,
}

/// Versioned offline cache.
pub struct OfflineCache<S, F> {
    config: OfflineConfig,
    store: S,
    fetcher: F,
    lifecycle: Mutex<Lifecycle>,
}

impl<S: ResponseStore, F: Fetcher> OfflineCache<S, F> {
    /// Create the cache, restoring lifecycle markers from `store`.
    pub fn new(config: OfflineConfig, store: S, fetcher: F) -> Result<Self> {
        let active = store.marker(ACTIVE_MARKER)?;
        let waiting = store.marker(WAITING_MARKER)?;

        let phase = match (&active, &waiting) {
            (_, Some(w)) => LifecycleState::Waiting(w.clone()),
            (Some(a), None) => LifecycleState::Active(a.clone()),
            (None, None) => LifecycleState::Idle,
        };

        Ok(Self {
            config,
            store,
            fetcher,
            lifecycle: Mutex::new(Lifecycle {
                phase,
                active,
                waiting,
            }),
        })
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle().phase.clone()
    }

    /// Version currently answering requests.
    pub fn active_version(&self) -> Option<String> {
        self.lifecycle().active.clone()
    }

    pub fn status(&self) -> Result<OfflineStatus> {
        let (state, active, waiting) = {
            let lc = self.lifecycle();
            (lc.phase.clone(), lc.active.clone(), lc.waiting.clone())
        };

        let mut buckets = Vec::new();
        for bucket in self.store.buckets()? {
            let count = self.store.entry_count(&bucket)?;
            buckets.push((bucket, count));
        }

        Ok(OfflineStatus {
            state,
            active,
            waiting,
            buckets,
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Precache the manifest for the configured version.
    ///
    /// Either every asset is stored or none is. With no version active the
    /// new one activates at once; otherwise it waits for
    /// [`ControlMessage::SkipWaiting`].
    pub async fn install(&self) -> Result<LifecycleState> {
        let version = self.config.version.clone();
        let previous = {
            let mut lc = self.lifecycle();
            if lc.active.as_deref() == Some(version.as_str()) {
                debug!("Version {} already active", version);
                return Ok(lc.phase.clone());
            }
            std::mem::replace(&mut lc.phase, LifecycleState::Installing(version.clone()))
        };

        info!("Installing offline cache {}", version);
        let entries = match self.fetch_manifest().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Install of {} failed: {}", version, e);
                self.lifecycle().phase = previous;
                return Err(e.into());
            }
        };

        let bucket = bucket_name(&version);
        let stored = self
            .store
            .delete_bucket(&bucket)
            .and_then(|_| self.store.put_all(&bucket, &entries));
        if let Err(e) = stored {
            self.lifecycle().phase = previous;
            return Err(e.into());
        }

        let has_active = self.lifecycle().active.is_some();
        if has_active {
            self.store.set_marker(WAITING_MARKER, Some(&version))?;
            let mut lc = self.lifecycle();
            lc.waiting = Some(version.clone());
            lc.phase = LifecycleState::Waiting(version.clone());
            info!("Version {} installed and waiting", version);
            Ok(lc.phase.clone())
        } else {
            self.activate(&version)?;
            Ok(self.state())
        }
    }

    async fn fetch_manifest(&self) -> ApiResult<Vec<(String, HttpResponse)>> {
        let fetches = self.config.precache.iter().map(|path| async move {
            let url = self.config.resolve(path);
            let response = self.fetcher.fetch(&HttpRequest::get(url.clone())).await?;
            if response.status != CACHEABLE_STATUS {
                return Err(ApiError::InvalidResponse(format!(
                    "Precache of {} returned status {}",
                    url, response.status
                )));
            }
            Ok((url, response))
        });
        try_join_all(fetches).await
    }

    /// Make `version` current: delete every other bucket, then serve from it.
    fn activate(&self, version: &str) -> Result<()> {
        self.lifecycle().phase = LifecycleState::Activating(version.to_string());

        let keep = bucket_name(version);
        for bucket in self.store.buckets()? {
            if bucket != keep && bucket.starts_with(BUCKET_PREFIX) {
                let removed = self.store.delete_bucket(&bucket)?;
                info!("Deleted old cache {} ({} responses)", bucket, removed);
            }
        }

        self.store.set_marker(ACTIVE_MARKER, Some(version))?;
        self.store.set_marker(WAITING_MARKER, None)?;

        let mut lc = self.lifecycle();
        lc.active = Some(version.to_string());
        lc.waiting = None;
        lc.phase = LifecycleState::Active(version.to_string());
        info!("Offline cache {} active", version);
        Ok(())
    }

    /// Handle a control message. Returns true if it changed state.
    pub fn handle_message(&self, message: ControlMessage) -> Result<bool> {
        match message {
            ControlMessage::SkipWaiting => {
                let waiting = self.lifecycle().waiting.clone();
                match waiting {
                    Some(version) => {
                        self.activate(&version)?;
                        Ok(true)
                    }
                    None => {
                        debug!("Skip-waiting with no waiting version");
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Handle a raw JSON control message. Unknown messages are ignored.
    pub fn handle_raw_message(&self, raw: &str) -> Result<bool> {
        match serde_json::from_str::<ControlMessage>(raw) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                warn!("Ignoring unknown control message: {}", e);
                Ok(false)
            }
        }
    }

    /// Intercept one request.
    ///
    /// Writes and excluded paths go straight to the network. Reads are
    /// fetched live and stored on success; on network failure the stored
    /// copy is returned, or the root document for a navigation. With
    /// nothing to fall back on, the network error is returned.
    pub async fn handle_fetch(&self, request: &HttpRequest) -> ApiResult<FetchOutcome> {
        let bucket = self.active_version().map(|v| bucket_name(&v));

        let bucket = match bucket {
            Some(bucket) if request.is_read() && !self.config.is_excluded(request) => bucket,
            _ => {
                let response = self.fetcher.fetch(request).await?;
                return Ok(FetchOutcome {
                    response,
                    source: ResponseSource::Passthrough,
                });
            }
        };

        let err = match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == CACHEABLE_STATUS
                    && let Err(e) = self.store.put(&bucket, "GET", &request.url, &response)
                {
                    warn!("Failed to cache {}: {}", request.url, e);
                }
                return Ok(FetchOutcome {
                    response,
                    source: ResponseSource::Network,
                });
            }
            Err(err) => err,
        };

        debug!("Network failed for {}: {}", request.url, err);

        if let Some(response) = self.lookup(&bucket, &request.url) {
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Cache,
            });
        }

        if request.navigation
            && let Some(response) = self.lookup(&bucket, &self.config.root_url())
        {
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::OfflineFallback,
            });
        }

        Err(err)
    }

    fn lookup(&self, bucket: &str, url: &str) -> Option<HttpResponse> {
        match self.store.get(bucket, "GET", url) {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", url, e);
                None
            }
        }
    }
}
