//! Realtime change delivery
//!
//! The push subscription is modelled as a bounded queue. A producer pushes
//! [`ChangePayload`]s; a consumer task drains them in arrival order and
//! applies each burst in as few batches as ordering allows.

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::query::SyncedQuery;
use super::reconcile::{ChangePayload, Collection, Record, decode_payloads, split_batches};

/// Default upper bound on events folded into one batch.
pub const DEFAULT_MAX_BATCH: usize = 256;

/// Create a bounded change channel.
pub fn change_channel(capacity: usize) -> (ChangePublisher, ChangeSubscriber) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChangePublisher { tx },
        ChangeSubscriber {
            rx,
            table: None,
            max_batch: DEFAULT_MAX_BATCH,
        },
    )
}

/// Producer side. Cloneable; the channel closes when every publisher is dropped.
#[derive(Debug, Clone)]
pub struct ChangePublisher {
    tx: mpsc::Sender<ChangePayload>,
}

impl ChangePublisher {
    /// Queue a payload, waiting while the channel is full.
    /// Returns false if the subscriber is gone.
    pub async fn publish(&self, payload: ChangePayload) -> bool {
        self.tx.send(payload).await.is_ok()
    }

    /// Queue a payload without waiting. Returns false if full or closed.
    pub fn try_publish(&self, payload: ChangePayload) -> bool {
        self.tx.try_send(payload).is_ok()
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct ChangeSubscriber {
    rx: mpsc::Receiver<ChangePayload>,
    table: Option<String>,
    max_batch: usize,
}

impl ChangeSubscriber {
    /// Only yield payloads for `table`.
    pub fn for_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Wait for the next payload, then drain whatever else is already
    /// queued, up to the batch limit. `None` once the channel is closed
    /// and empty.
    pub async fn next_batch(&mut self) -> Option<Vec<ChangePayload>> {
        loop {
            let first = self.rx.recv().await?;
            let mut batch = Vec::new();
            self.push_matching(&mut batch, first);

            while batch.len() < self.max_batch {
                match self.rx.try_recv() {
                    Ok(payload) => self.push_matching(&mut batch, payload),
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                return Some(batch);
            }
        }
    }

    fn push_matching(&self, batch: &mut Vec<ChangePayload>, payload: ChangePayload) {
        match &self.table {
            Some(table) if *table != payload.table => {
                debug!("Ignoring change for table {}", payload.table);
            }
            _ => batch.push(payload),
        }
    }
}

/// Drain `subscriber` into `query` until the channel closes.
///
/// Resolves to the number of events that were decoded and applied.
pub fn spawn_reconciler<R: Record>(
    query: SyncedQuery<Collection<R>>,
    mut subscriber: ChangeSubscriber,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut applied = 0;
        while let Some(batch) = subscriber.next_batch().await {
            let events = decode_payloads::<R>(batch);
            if events.is_empty() {
                continue;
            }
            applied += events.len();
            for batch in split_batches(events) {
                query.apply_changes(batch);
            }
        }
        info!("Change channel closed for {}", query.key());
        applied
    })
}
