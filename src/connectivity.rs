//! Network and focus events
//!
//! [`Connectivity`] is the hub for online/offline transitions and
//! focus-regained signals. Listeners attach through [`Connectivity::subscribe`]
//! and detach deterministically through the returned [`Subscription`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::client::RemoteApi;

/// A network or visibility signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
    FocusRegained,
}

/// Event hub. Emits `Online`/`Offline` only on actual transitions.
pub struct Connectivity {
    tx: broadcast::Sender<NetworkEvent>,
    online: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = broadcast::channel(32);
        let (online, _) = watch::channel(initially_online);
        Self { tx, online }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Record the current connectivity. Returns true on a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if changed {
            let event = if online {
                NetworkEvent::Online
            } else {
                NetworkEvent::Offline
            };
            info!("Connectivity changed: {:?}", event);
            let _ = self.tx.send(event);
        }
        changed
    }

    /// Receiver tracking the current online flag.
    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn focus_regained(&self) {
        let _ = self.tx.send(NetworkEvent::FocusRegained);
    }

    /// Raw receiver for callers that run their own loop.
    pub fn listen(&self) -> broadcast::Receiver<NetworkEvent> {
        self.tx.subscribe()
    }

    /// Run `handler` for every event, one at a time, until unsubscribed.
    pub fn subscribe<F, Fut>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(NetworkEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connectivity listener skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription { task: Some(task) }
    }
}

/// Handle to an attached listener. Dropping it detaches the listener.
#[derive(Debug)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Probes the remote on an interval and feeds transitions into a hub.
pub struct ConnectivityMonitor {
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    pub fn spawn<A>(connectivity: Arc<Connectivity>, api: Arc<A>, every: Duration) -> Self
    where
        A: RemoteApi + ?Sized + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let online = match api.ping().await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Connectivity probe failed: {}", e);
                        false
                    }
                };
                connectivity.set_online(online);
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRemoteApi;
    use std::sync::Mutex;

    #[test]
    fn test_set_online_emits_only_transitions() {
        let hub = Connectivity::new(true);
        let mut rx = hub.listen();

        assert!(!hub.set_online(true));
        assert!(hub.set_online(false));
        assert!(!hub.set_online(false));
        assert!(hub.set_online(true));

        assert_eq!(rx.try_recv().unwrap(), NetworkEvent::Offline);
        assert_eq!(rx.try_recv().unwrap(), NetworkEvent::Online);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let hub = Connectivity::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let mut sub = hub.subscribe(move |event| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(event);
            }
        });
        assert!(sub.is_active());

        hub.set_online(false);
        hub.focus_regained();
        tokio::time::sleep(Duration::from_millis(20)).await;

        sub.unsubscribe();
        assert!(!sub.is_active());

        hub.set_online(true);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![NetworkEvent::Offline, NetworkEvent::FocusRegained]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reports_probe_failures() {
        let hub = Arc::new(Connectivity::new(true));
        let api = Arc::new(MockRemoteApi::new());
        api.set_reachable(false);

        let mut rx = hub.listen();
        let _monitor = ConnectivityMonitor::spawn(hub.clone(), api.clone(), Duration::from_secs(5));

        assert_eq!(rx.recv().await.unwrap(), NetworkEvent::Offline);

        api.set_reachable(true);
        assert_eq!(rx.recv().await.unwrap(), NetworkEvent::Online);
        assert!(hub.is_online());
    }
}
