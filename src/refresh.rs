//! Dashboard refresh orchestration
//!
//! Combines a [`SyncedQuery`] with manual refresh and online recovery into
//! the single refresh surface the dashboard shows.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info};
use serde::Serialize;

use crate::client::ApiResult;
use crate::connectivity::{Connectivity, NetworkEvent, Subscription};
use crate::error::ApiError;
use crate::notify::{Notice, Notifier};
use crate::sync::{RefreshTrigger, SyncedQuery};

/// Combined refresh state for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshState {
    /// Manual refresh running, or a refetch over existing data
    pub is_refreshing: bool,
    /// Network loading or manual refresh in progress
    pub is_loading: bool,
    pub error: Option<ApiError>,
    pub last_updated_ms: Option<i64>,
}

/// Manual refresh and online recovery for one query.
pub struct RefreshOrchestrator<T> {
    query: SyncedQuery<T>,
    notifier: Arc<Notifier>,
    manual: Arc<AtomicUsize>,
}

impl<T> Clone for RefreshOrchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            notifier: Arc::clone(&self.notifier),
            manual: Arc::clone(&self.manual),
        }
    }
}

/// Decrements the manual refresh counter when the refresh ends, even if its
/// future is dropped.
struct ManualGuard(Arc<AtomicUsize>);

impl Drop for ManualGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> RefreshOrchestrator<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn new(query: SyncedQuery<T>, notifier: Arc<Notifier>) -> Self {
        Self {
            query,
            notifier,
            manual: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn query(&self) -> &SyncedQuery<T> {
        &self.query
    }

    /// Refresh now. Concurrent calls share one fetch.
    pub async fn refresh_data(&self) -> ApiResult<Arc<T>> {
        self.manual.fetch_add(1, Ordering::SeqCst);
        let _guard = ManualGuard(Arc::clone(&self.manual));
        self.query.refresh(RefreshTrigger::Manual).await
    }

    pub fn state(&self) -> RefreshState {
        let snapshot = self.query.snapshot();
        let manual = self.manual.load(Ordering::SeqCst) > 0;

        RefreshState {
            is_refreshing: manual || snapshot.freshness.is_refreshing,
            is_loading: manual || snapshot.freshness.is_loading,
            error: snapshot.freshness.error,
            last_updated_ms: snapshot.freshness.last_updated_ms,
        }
    }

    /// Follow connectivity: announce going offline, and on coming back
    /// online announce it and then run exactly one refresh.
    pub fn watch_connectivity(&self, connectivity: &Connectivity) -> Subscription {
        let this = self.clone();
        connectivity.subscribe(move |event| {
            let this = this.clone();
            async move { this.on_network_event(event).await }
        })
    }

    async fn on_network_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::Offline => {
                self.notifier.set_offline(true);
                self.notifier.notify(Notice::Offline);
            }
            NetworkEvent::Online => {
                self.notifier.set_offline(false);
                self.notifier.notify(Notice::BackOnline);
                info!("Back online, refreshing {}", self.query.key());
                if let Err(e) = self.refresh_data().await {
                    debug!("Recovery refresh of {} failed: {}", self.query.key(), e);
                }
            }
            NetworkEvent::FocusRegained => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::models::ClientRecord;
    use crate::client::{MockRemoteApi, SelectQuery, fetch_records};
    use crate::clock::ManualClock;
    use crate::sync::{Collection, QueryOptions, SyncContext};
    use serde_json::json;
    use std::time::Duration;

    async fn orchestrator(
        delay: Duration,
    ) -> (
        Arc<MockRemoteApi>,
        RefreshOrchestrator<Collection<ClientRecord>>,
        SyncContext,
    ) {
        let api = Arc::new(
            MockRemoteApi::new()
                .with_rows("clients", vec![json!({"id": "c-1", "name": "Acme"})])
                .await
                .with_delay(delay),
        );
        let ctx = SyncContext::new(Arc::new(ManualClock::new(0)))
            .with_notifier(Arc::new(Notifier::new(16)));

        let fetch_api = api.clone();
        let query = SyncedQuery::new("clients", &ctx, QueryOptions::default(), move |signal| {
            let api = fetch_api.clone();
            async move {
                fetch_records::<ClientRecord, _>(api.as_ref(), "clients", &SelectQuery::new(), &signal)
                    .await
                    .map(Collection::from_records)
            }
        });

        let orchestrator = RefreshOrchestrator::new(query, ctx.notifier.clone());
        (api, orchestrator, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refresh_data_is_single_flight() {
        let (api, orch, _ctx) = orchestrator(Duration::from_millis(50)).await;

        let (a, b) = tokio::join!(orch.refresh_data(), orch.refresh_data());

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(api.call_counts().await.select, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_reflects_manual_refresh() {
        let (_api, orch, _ctx) = orchestrator(Duration::from_millis(50)).await;
        assert_eq!(orch.state(), RefreshState::default());

        let task = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.refresh_data().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let during = orch.state();
        assert!(during.is_loading);
        assert!(during.is_refreshing);

        task.await.unwrap().unwrap();

        let after = orch.state();
        assert!(!after.is_loading);
        assert!(!after.is_refreshing);
        assert_eq!(after.last_updated_ms, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_online_notifies_then_refreshes_once() {
        let (api, orch, ctx) = orchestrator(Duration::from_millis(50)).await;
        let hub = Connectivity::new(true);
        let mut notices = ctx.notifier.subscribe();
        let _sub = orch.watch_connectivity(&hub);

        hub.set_online(false);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(notices.recv().await.unwrap(), Notice::Offline);
        assert!(ctx.notifier.is_offline());

        hub.set_online(true);
        // Notice arrives while the refresh is still in flight
        assert_eq!(notices.recv().await.unwrap(), Notice::BackOnline);
        assert!(orch.state().is_refreshing);
        assert!(!ctx.notifier.is_offline());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(api.call_counts().await.select, 1);
        assert!(orch.query().data().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_online_notice_not_gated_on_success() {
        let (api, orch, ctx) = orchestrator(Duration::ZERO).await;
        api.fail_next(ApiError::Unauthorized).await;
        let hub = Connectivity::new(false);
        let mut notices = ctx.notifier.subscribe();
        let _sub = orch.watch_connectivity(&hub);

        hub.set_online(true);
        assert_eq!(notices.recv().await.unwrap(), Notice::BackOnline);
        assert!(matches!(
            notices.recv().await.unwrap(),
            Notice::SyncFailed { .. }
        ));
    }
}
