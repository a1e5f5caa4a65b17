//! Mock data API for testing
//!
//! Provides an in-memory [`RemoteApi`] so sync and refresh logic can be
//! exercised without a backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ApiResult, RemoteApi, SelectQuery};
use crate::abort::{AbortSignal, or_abort};
use crate::error::ApiError;

/// Mock API client for testing.
///
/// # Example
/// ```ignore
/// let mock = MockRemoteApi::new()
///     .with_rows("clients", vec![json!({"id": "c-1", "name": "Acme"})])
///     .await;
/// ```
pub struct MockRemoteApi {
    /// Rows returned per table
    tables: Arc<Mutex<HashMap<String, Vec<serde_json::Value>>>>,
    /// Errors returned in order, one per call, before rows are served again
    errors: Arc<Mutex<VecDeque<ApiError>>>,
    /// Simulated latency of every select
    delay: Option<Duration>,
    /// Whether ping succeeds
    reachable: AtomicBool,
    call_count: Arc<Mutex<CallCounts>>,
    /// Queries seen by select, in order
    captured: Arc<Mutex<Vec<(String, SelectQuery)>>>,
}

impl Default for MockRemoteApi {
    fn default() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            errors: Arc::new(Mutex::new(VecDeque::new())),
            delay: None,
            reachable: AtomicBool::new(true),
            call_count: Arc::new(Mutex::new(CallCounts::default())),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Tracks API call counts for test verification
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub select: usize,
    pub ping: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.select + self.ping
    }
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure rows returned for `table`.
    pub async fn with_rows(self, table: &str, rows: Vec<serde_json::Value>) -> Self {
        self.set_rows(table, rows).await;
        self
    }

    /// Queue errors returned by the next selects, one per call.
    pub async fn with_errors(self, errors: Vec<ApiError>) -> Self {
        self.errors.lock().await.extend(errors);
        self
    }

    /// Delay every select by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace rows for `table` after construction.
    pub async fn set_rows(&self, table: &str, rows: Vec<serde_json::Value>) {
        self.tables.lock().await.insert(table.to_string(), rows);
    }

    /// Fail the next select with `error`.
    pub async fn fail_next(&self, error: ApiError) {
        self.errors.lock().await.push_back(error);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub async fn call_counts(&self) -> CallCounts {
        self.call_count.lock().await.clone()
    }

    pub async fn captured_queries(&self) -> Vec<(String, SelectQuery)> {
        self.captured.lock().await.clone()
    }

    async fn serve(&self, table: &str) -> ApiResult<Vec<serde_json::Value>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.errors.lock().await.pop_front() {
            return Err(err);
        }

        Ok(self
            .tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn select(
        &self,
        table: &str,
        query: &SelectQuery,
        signal: &AbortSignal,
    ) -> ApiResult<Vec<serde_json::Value>> {
        self.call_count.lock().await.select += 1;
        self.captured
            .lock()
            .await
            .push((table.to_string(), query.clone()));
        signal.check()?;

        or_abort(self.serve(table), signal).await
    }

    async fn ping(&self) -> ApiResult<()> {
        self.call_count.lock().await.ping += 1;
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Network("Failed to connect to API".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::{AbortReason, create_abort_controller};
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_default_empty() {
        let mock = MockRemoteApi::new();
        let rows = mock
            .select("clients", &SelectQuery::new(), &AbortSignal::never())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_mock_errors_are_consumed_in_order() {
        let mock = MockRemoteApi::new()
            .with_rows("clients", vec![json!({"id": "c-1"})])
            .await
            .with_errors(vec![
                ApiError::Network("down".into()),
                ApiError::ServerError("500".into()),
            ])
            .await;
        let q = SelectQuery::new();
        let never = AbortSignal::never();

        assert_eq!(
            mock.select("clients", &q, &never).await,
            Err(ApiError::Network("down".into()))
        );
        assert_eq!(
            mock.select("clients", &q, &never).await,
            Err(ApiError::ServerError("500".into()))
        );
        assert_eq!(mock.select("clients", &q, &never).await.unwrap().len(), 1);
        assert_eq!(mock.call_counts().await.select, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_delay_honours_abort() {
        let mock = MockRemoteApi::new().with_delay(Duration::from_secs(10));
        let (controller, signal) = create_abort_controller();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            controller.abort(AbortReason::Timeout);
        });

        let result = mock.select("clients", &SelectQuery::new(), &signal).await;
        assert_eq!(result, Err(ApiError::Aborted("Timeout".into())));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_reachability() {
        let mock = MockRemoteApi::new();
        assert!(mock.ping().await.is_ok());

        mock.set_reachable(false);
        assert!(mock.ping().await.is_err());
        assert_eq!(mock.call_counts().await.ping, 2);
    }
}
