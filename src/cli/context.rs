//! Command execution context
//!
//! Loads config once and builds the services every remote-facing command
//! shares: the REST client, the sync context and the session cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStorage, MemoryBackend, TtlBackend, TtlCache};
use crate::cli::{GlobalOptions, OutputFormat};
use crate::client::{RestClient, SelectQuery, fetch_records};
use crate::clock::{self, SharedClock};
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionCache;
use crate::stabilizer::DataStabilizer;
use crate::sync::{Collection, QueryOptions, Record, SyncContext, SyncedQuery};

/// What the CLI remembers about the remote it last talked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub api_url: String,
    /// RFC 3339 time the session was opened
    pub started_at: String,
}

pub type Sessions = SessionCache<RemoteSession, Box<dyn TtlBackend>>;

/// Open the session cache, in memory only when `no_cache` is set.
pub fn open_sessions(clock: SharedClock, no_cache: bool, ttl: Duration) -> Result<Sessions> {
    let backend: Box<dyn TtlBackend> = if no_cache {
        Box::new(MemoryBackend::new())
    } else {
        Box::new(CacheStorage::open()?)
    };
    Ok(SessionCache::new(TtlCache::new(backend, clock)).with_ttl(ttl))
}

/// Context for commands that talk to the remote API.
pub struct CommandContext {
    pub config: Config,
    pub config_path: PathBuf,
    pub format: OutputFormat,
    pub client: Arc<RestClient>,
    pub sync: SyncContext,
    pub sessions: Sessions,
}

impl CommandContext {
    /// Load and validate config, then open or extend the remote session.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let config_path = Config::resolve_path(opts.config_ref())?;
        let config = Config::load_at(opts.config_ref())?;
        let (api_url, api_key) = config.validate_remote()?;

        let client = Arc::new(RestClient::new(api_url, api_key)?);

        let clock = clock::system();
        let stabilizer =
            DataStabilizer::new(clock.clone()).with_window(config.cache.stabilizer_window());
        let sync = SyncContext::new(clock.clone()).with_stabilizer(stabilizer);

        let sessions = open_sessions(clock, opts.no_cache, config.cache.session_ttl())?;

        let ctx = Self {
            config,
            config_path,
            format: opts.format,
            client,
            sync,
            sessions,
        };
        ctx.touch_session()?;
        Ok(ctx)
    }

    /// Extend the current session, or start a new one when it has expired
    /// or points at a different remote.
    pub fn touch_session(&self) -> Result<()> {
        let api_url = self.client.base_url();
        match self.sessions.load() {
            Some(record) if record.payload.api_url == api_url => {
                debug!("Session extended until {}", record.expires_at_ms);
            }
            _ => {
                let session = RemoteSession {
                    api_url: api_url.to_string(),
                    started_at: Utc::now().to_rfc3339(),
                };
                self.sessions.store(&session)?;
            }
        }
        Ok(())
    }

    /// Query keeping every row of `table` in sync.
    pub fn collection_query<R: Record>(
        &self,
        table: &str,
        options: QueryOptions,
    ) -> SyncedQuery<Collection<R>> {
        let select = SelectQuery::new();
        let key = select.key_for(table);
        let client = Arc::clone(&self.client);
        let table = table.to_string();

        SyncedQuery::new(key, &self.sync, options, move |signal| {
            let client = Arc::clone(&client);
            let table = table.clone();
            let select = select.clone();
            async move {
                fetch_records::<R, _>(client.as_ref(), &table, &select, &signal)
                    .await
                    .map(Collection::from_records)
            }
        })
    }
}
