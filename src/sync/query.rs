//! Single remote query with freshness tracking

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, trace};
use serde::Serialize;
use tokio::sync::watch;

use super::SyncContext;
use super::reconcile::{self, ChangeEvent, Collection, Record};
use super::retry::{RetryPolicy, retry_with_backoff};
use crate::abort::{AbortController, AbortReason, AbortSignal, with_timeout};
use crate::clock::duration_ms;
use crate::client::ApiResult;
use crate::error::ApiError;
use crate::notify::Notice;

/// Fetch function: receives the attempt's abort signal.
pub type FetchFn<T> = Arc<dyn Fn(AbortSignal) -> BoxFuture<'static, ApiResult<T>> + Send + Sync>;

type SharedFetch<T> = Shared<BoxFuture<'static, ApiResult<Arc<T>>>>;

/// Per-query tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Period of background refetches
    pub poll_interval: Duration,
    /// Age below which data is fresh
    pub stale_after: Duration,
    pub retry: RetryPolicy,
    /// Limit for a single attempt
    pub request_timeout: Duration,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(15),
            refetch_on_focus: true,
            refetch_on_reconnect: true,
        }
    }
}

/// Freshness metadata exposed with every snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshnessState {
    pub last_updated_ms: Option<i64>,
    /// Fetching with no data loaded yet
    pub is_loading: bool,
    /// Fetching while data is already shown
    pub is_refreshing: bool,
    /// Failed attempts in the current sequence
    pub failure_count: u32,
    /// Last surfaced error, cleared by the next success
    pub error: Option<ApiError>,
}

impl FreshnessState {
    pub fn is_fetching(&self) -> bool {
        self.is_loading || self.is_refreshing
    }
}

/// Read-only view of a query.
///
/// `data_version` only moves when the payload actually changed, and the
/// `Arc` is reused otherwise, so subscribers can skip identical renders.
#[derive(Debug)]
pub struct QuerySnapshot<T> {
    pub data: Option<Arc<T>>,
    pub data_version: u64,
    pub freshness: FreshnessState,
}

impl<T> Clone for QuerySnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            data_version: self.data_version,
            freshness: self.freshness.clone(),
        }
    }
}

impl<T> Default for QuerySnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            data_version: 0,
            freshness: FreshnessState::default(),
        }
    }
}

/// What asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Mount,
    Interval,
    Focus,
    Reconnect,
    Manual,
}

impl RefreshTrigger {
    /// Opportunistic triggers are satisfied by fresh data.
    pub fn skips_when_fresh(self) -> bool {
        matches!(
            self,
            RefreshTrigger::Mount | RefreshTrigger::Focus | RefreshTrigger::Reconnect
        )
    }
}

struct Inflight<T> {
    id: u64,
    fetch: SharedFetch<T>,
    controller: AbortController,
}

struct QueryState<T> {
    data: Option<Arc<T>>,
    data_version: u64,
    freshness: FreshnessState,
    inflight: Option<Inflight<T>>,
    next_fetch_id: u64,
}

struct Inner<T> {
    key: String,
    fetch: FetchFn<T>,
    options: QueryOptions,
    ctx: SyncContext,
    state: Mutex<QueryState<T>>,
    tx: watch::Sender<QuerySnapshot<T>>,
}

/// A remote query kept fresh in memory.
///
/// Cloning yields another handle to the same query. At most one fetch is in
/// flight at a time; refresh requests made meanwhile join it.
pub struct SyncedQuery<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncedQuery<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SyncedQuery<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new<F, Fut>(key: impl Into<String>, ctx: &SyncContext, options: QueryOptions, fetch: F) -> Self
    where
        F: Fn(AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
    {
        let fetch: FetchFn<T> = Arc::new(move |signal| fetch(signal).boxed());
        let (tx, _) = watch::channel(QuerySnapshot::default());

        Self {
            inner: Arc::new(Inner {
                key: key.into(),
                fetch,
                options,
                ctx: ctx.clone(),
                state: Mutex::new(QueryState {
                    data: None,
                    data_version: 0,
                    freshness: FreshnessState::default(),
                    inflight: None,
                    next_fetch_id: 0,
                }),
                tx,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn options(&self) -> &QueryOptions {
        &self.inner.options
    }

    pub fn snapshot(&self) -> QuerySnapshot<T> {
        self.inner.tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<QuerySnapshot<T>> {
        self.inner.tx.subscribe()
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.inner.lock().data.clone()
    }

    pub fn is_fresh(&self) -> bool {
        self.inner.fresh_data(&self.inner.lock()).is_some()
    }

    /// Fetch unless `trigger` is satisfied by fresh data, joining any fetch
    /// already in flight.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> ApiResult<Arc<T>> {
        let fetch = {
            let mut state = self.inner.lock();

            if trigger.skips_when_fresh()
                && let Some(data) = self.inner.fresh_data(&state)
            {
                trace!("{} is fresh, skipping {:?} refresh", self.inner.key, trigger);
                return Ok(data);
            }

            match state.inflight.as_ref().map(|f| f.fetch.clone()) {
                Some(joined) => {
                    debug!("Joining in-flight fetch for {}", self.inner.key);
                    joined
                }
                None => self.start_fetch(&mut state, trigger),
            }
        };

        fetch.await
    }

    /// Abort the in-flight fetch, if any. Its joiners receive
    /// [`ApiError::Aborted`] and its result is discarded.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.lock();
        let Some(inflight) = state.inflight.take() else {
            return false;
        };
        inflight.controller.abort(AbortReason::Teardown);
        state.freshness.is_loading = false;
        state.freshness.is_refreshing = false;
        self.inner.publish(&state);
        true
    }

    /// Return to the initial state: no data, no fetch, default freshness.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        if let Some(inflight) = state.inflight.take() {
            inflight.controller.abort(AbortReason::Teardown);
        }
        if state.data.take().is_some() {
            state.data_version += 1;
        }
        state.freshness = FreshnessState::default();
        self.inner.ctx.stabilizer.clear_cache(&self.inner.key);
        self.inner.publish(&state);
        debug!("Reset query {}", self.inner.key);
    }

    fn start_fetch(&self, state: &mut QueryState<T>, trigger: RefreshTrigger) -> SharedFetch<T> {
        let id = state.next_fetch_id;
        state.next_fetch_id += 1;

        let controller = AbortController::new();
        let signal = controller.signal();

        debug!("Fetching {} ({:?})", self.inner.key, trigger);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.run(id, signal).await });

        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(ApiError::Aborted(format!("fetch task ended: {}", e))),
            }
        }
        .boxed()
        .shared();

        state.freshness.is_loading = state.data.is_none();
        state.freshness.is_refreshing = state.data.is_some();
        state.inflight = Some(Inflight {
            id,
            fetch: fetch.clone(),
            controller,
        });
        self.inner.publish(state);

        fetch
    }
}

impl<T> Inner<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, QueryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &QueryState<T>) {
        self.tx.send_replace(QuerySnapshot {
            data: state.data.clone(),
            data_version: state.data_version,
            freshness: state.freshness.clone(),
        });
    }

    fn fresh_data(&self, state: &QueryState<T>) -> Option<Arc<T>> {
        let updated = state.freshness.last_updated_ms?;
        let age = self.ctx.clock.now_ms() - updated;
        if age < duration_ms(self.options.stale_after) {
            state.data.clone()
        } else {
            None
        }
    }

    /// Body of the spawned fetch task. Runs to completion even when every
    /// caller has stopped waiting.
    async fn run(&self, id: u64, signal: AbortSignal) -> ApiResult<Arc<T>> {
        let result = retry_with_backoff(
            &self.options.retry,
            &signal,
            |failures, err| self.record_failure(id, failures, err),
            || with_timeout((self.fetch)(signal.clone()), self.options.request_timeout),
        )
        .await;

        self.finish(id, result)
    }

    fn record_failure(&self, id: u64, failures: u32, err: &ApiError) {
        debug!("Fetch of {} failed (attempt {}): {}", self.key, failures, err);
        let mut state = self.lock();
        if state.inflight.as_ref().is_some_and(|f| f.id == id) {
            state.freshness.failure_count = failures;
            self.publish(&state);
        }
    }

    fn finish(&self, id: u64, result: ApiResult<T>) -> ApiResult<Arc<T>> {
        let mut state = self.lock();
        if !state.inflight.as_ref().is_some_and(|f| f.id == id) {
            debug!("Discarding result of superseded fetch for {}", self.key);
            return result.map(Arc::new);
        }

        state.inflight = None;
        state.freshness.is_loading = false;
        state.freshness.is_refreshing = false;

        match result {
            Ok(value) => {
                let changed = self.ctx.stabilizer.has_changed(&self.key, &value);
                let data = match (state.data.clone(), changed) {
                    (Some(existing), false) => {
                        trace!("{} unchanged after refetch", self.key);
                        existing
                    }
                    _ => {
                        let data = Arc::new(value);
                        state.data = Some(Arc::clone(&data));
                        state.data_version += 1;
                        data
                    }
                };

                state.freshness.last_updated_ms = Some(self.ctx.clock.now_ms());
                state.freshness.failure_count = 0;
                state.freshness.error = None;
                self.publish(&state);
                Ok(data)
            }
            Err(err) => {
                state.freshness.error = Some(err.clone());
                self.publish(&state);
                drop(state);

                if !matches!(err, ApiError::Aborted(_)) {
                    self.ctx.notifier.notify(Notice::SyncFailed {
                        key: self.key.clone(),
                        message: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }
}

impl<R: Record> SyncedQuery<Collection<R>> {
    /// Fold realtime changes into the loaded collection.
    ///
    /// Runs under the same lock as refetch results, so per query the two are
    /// applied in arrival order. Ignored until the first load completes.
    /// Returns true if the collection changed.
    pub fn apply_changes(&self, changes: Vec<ChangeEvent<R>>) -> bool {
        if changes.is_empty() {
            return false;
        }

        let mut state = self.inner.lock();
        let Some(current) = state.data.clone() else {
            debug!(
                "No data loaded for {}, ignoring {} changes",
                self.inner.key,
                changes.len()
            );
            return false;
        };

        let next = reconcile::apply_changes(changes, &current);
        if next == *current {
            return false;
        }

        // A later refetch is compared against the patched collection
        let stabilizer = &self.inner.ctx.stabilizer;
        stabilizer.clear_cache(&self.inner.key);
        stabilizer.has_changed(&self.inner.key, &next);

        state.data = Some(Arc::new(next));
        state.data_version += 1;
        self.inner.publish(&state);
        true
    }
}
