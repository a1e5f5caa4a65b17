//! Background refresh scheduling
//!
//! A started query fetches on mount, on every poll tick while online, and
//! on focus-regained or reconnect events when those are enabled.

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::query::{RefreshTrigger, SyncedQuery};
use crate::connectivity::{Connectivity, NetworkEvent};

/// Running scheduler for one query. Dropping it stops the schedule but
/// leaves the query's data in place.
pub struct PollHandle<T> {
    task: Option<JoinHandle<()>>,
    query: SyncedQuery<T>,
}

impl<T> SyncedQuery<T>
where
    T: Serialize + Send + Sync + 'static,
{
    /// Start fetching on mount, on the poll interval and on network events.
    pub fn start(&self, connectivity: &Connectivity) -> PollHandle<T> {
        let query = self.clone();
        let mut events = connectivity.listen();
        let online = connectivity.watch_online();
        let period = self.options().poll_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            run_refresh(&query, RefreshTrigger::Mount).await;

            loop {
                let trigger = tokio::select! {
                    _ = interval.tick() => {
                        if !*online.borrow() {
                            debug!("Offline, skipping poll of {}", query.key());
                            continue;
                        }
                        RefreshTrigger::Interval
                    }
                    event = events.recv() => match event {
                        Ok(NetworkEvent::Online) if query.options().refetch_on_reconnect => {
                            RefreshTrigger::Reconnect
                        }
                        Ok(NetworkEvent::FocusRegained) if query.options().refetch_on_focus => {
                            RefreshTrigger::Focus
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Scheduler for {} skipped {} events", query.key(), skipped);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };

                run_refresh(&query, trigger).await;
            }
        });

        PollHandle {
            task: Some(task),
            query: self.clone(),
        }
    }
}

async fn run_refresh<T>(query: &SyncedQuery<T>, trigger: RefreshTrigger)
where
    T: Serialize + Send + Sync + 'static,
{
    if let Err(e) = query.refresh(trigger).await {
        debug!("{:?} refresh of {} failed: {}", trigger, query.key(), e);
    }
}

impl<T> PollHandle<T> {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> PollHandle<T>
where
    T: Serialize + Send + Sync + 'static,
{
    /// Stop scheduling and reset the query (teardown).
    pub fn stop(mut self) {
        self.abort_task();
        self.query.reset();
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        self.abort_task();
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
    use std::sync::Arc;
    use std::time::Duration;

    async fn fixture() -> (
        Arc<MockRemoteApi>,
        SyncedQuery<Collection<ClientRecord>>,
        ManualClock,
    ) {
        let api = Arc::new(
            MockRemoteApi::new()
                .with_rows("clients", vec![json!({"id": "c-1", "name": "Acme"})])
                .await,
        );
        let clock = ManualClock::new(0);
        let ctx = SyncContext::new(Arc::new(clock.clone()));

        let fetch_api = api.clone();
        let query = SyncedQuery::new("clients", &ctx, QueryOptions::default(), move |signal| {
            let api = fetch_api.clone();
            async move {
                fetch_records::<ClientRecord, _>(api.as_ref(), "clients", &SelectQuery::new(), &signal)
                    .await
                    .map(Collection::from_records)
            }
        });
        (api, query, clock)
    }

    async fn selects(api: &MockRemoteApi) -> usize {
        api.call_counts().await.select
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_and_interval() {
        let (api, query, _clock) = fixture().await;
        let hub = Connectivity::new(true);

        let handle = query.start(&hub);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(selects(&api).await, 1);
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(selects(&api).await, 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(selects(&api).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_refetches_only_stale_data() {
        let (api, query, clock) = fixture().await;
        let hub = Connectivity::new(true);
        let _handle = query.start(&hub);
        tokio::time::sleep(Duration::from_millis(1)).await;

        hub.focus_regained();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(selects(&api).await, 1);

        clock.advance(Duration::from_secs(20));
        hub.focus_regained();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(selects(&api).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_pauses_while_offline() {
        let (api, query, clock) = fixture().await;
        let hub = Connectivity::new(true);
        let _handle = query.start(&hub);
        tokio::time::sleep(Duration::from_millis(1)).await;

        hub.set_online(false);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(selects(&api).await, 1);

        clock.advance(Duration::from_secs(61));
        hub.set_online(true);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(selects(&api).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_query() {
        let (_api, query, _clock) = fixture().await;
        let hub = Connectivity::new(true);

        let handle = query.start(&hub);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(query.data().is_some());

        handle.stop();
        assert!(query.data().is_none());
    }
}
