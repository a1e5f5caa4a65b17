//! Remote data API client
//!
//! The backend is consumed as a black box: an async row query per table and
//! a reachability probe. Realtime change delivery lives in [`crate::sync`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::abort::AbortSignal;
use crate::cache::cache_key;
use crate::error::ApiError;

#[cfg(test)]
pub mod mock;
pub mod models;
pub mod rate_limit;
pub mod rest;

#[cfg(test)]
pub use mock::MockRemoteApi;
pub use rest::RestClient;

/// Result type for remote calls. [`ApiError`] is `Clone`, so one failure can
/// be shared by every caller of a single-flight fetch.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Remote data API trait
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch rows of `table` matching `query` as raw JSON objects.
    async fn select(
        &self,
        table: &str,
        query: &SelectQuery,
        signal: &AbortSignal,
    ) -> ApiResult<Vec<serde_json::Value>>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> ApiResult<()>;
}

/// Row query for [`RemoteApi::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    /// Column list, `*` for all
    pub columns: String,
    /// Equality filters as (column, value)
    pub filters: Vec<(String, String)>,
    /// Order clause, e.g. `name.asc`
    pub order: Option<String>,
    pub limit: Option<usize>,
}

impl Default for SelectQuery {
    fn default() -> Self {
        Self {
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query string parameters in REST filter syntax.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        for (column, value) in &self.filters {
            params.push((column.clone(), format!("eq.{}", value)));
        }
        if let Some(ref order) = self.order {
            params.push(("order".to_string(), order.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Stable key identifying this query against `table`.
    pub fn key_for(&self, table: &str) -> String {
        let params = self.to_params();
        let params_ref: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        cache_key(table, &params_ref)
    }
}

/// Fetch rows and decode them into typed records.
pub async fn fetch_records<T, A>(
    api: &A,
    table: &str,
    query: &SelectQuery,
    signal: &AbortSignal,
) -> ApiResult<Vec<T>>
where
    T: DeserializeOwned,
    A: RemoteApi + ?Sized,
{
    let rows = api.select(table, query, signal).await?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to decode {} row: {}", table, e))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::models::ClientRecord;
    use serde_json::json;

    #[test]
    fn test_select_query_params() {
        let query = SelectQuery::new()
            .eq("status", "active")
            .order("name.asc")
            .limit(50);

        let params = query.to_params();
        assert_eq!(params[0], ("select".to_string(), "*".to_string()));
        assert!(params.contains(&("status".to_string(), "eq.active".to_string())));
        assert!(params.contains(&("order".to_string(), "name.asc".to_string())));
        assert!(params.contains(&("limit".to_string(), "50".to_string())));
    }

    #[test]
    fn test_query_key_depends_on_table_and_filters() {
        let base = SelectQuery::new();
        let filtered = SelectQuery::new().eq("owner", "sam");

        assert_eq!(base.key_for("clients"), SelectQuery::new().key_for("clients"));
        assert_ne!(base.key_for("clients"), base.key_for("metrics"));
        assert_ne!(base.key_for("clients"), filtered.key_for("clients"));
    }

    #[tokio::test]
    async fn test_fetch_records_decodes_rows() {
        let api = MockRemoteApi::new()
            .with_rows(
                "clients",
                vec![json!({"id": "c-1", "name": "Acme", "status": "active"})],
            )
            .await;

        let records: Vec<ClientRecord> =
            fetch_records(&api, "clients", &SelectQuery::new(), &AbortSignal::never())
                .await
                .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Acme");
    }

    #[tokio::test]
    async fn test_fetch_records_passes_query_through() {
        let api = MockRemoteApi::new();
        let query = SelectQuery::new().eq("owner", "sam").order("name.asc").limit(10);

        let _: Vec<ClientRecord> = fetch_records(&api, "clients", &query, &AbortSignal::never())
            .await
            .unwrap();

        let captured = api.captured_queries().await;
        assert_eq!(captured, vec![("clients".to_string(), query.clone())]);
        assert_eq!(
            captured[0].1.to_params(),
            vec![
                ("select".to_string(), "*".to_string()),
                ("owner".to_string(), "eq.sam".to_string()),
                ("order".to_string(), "name.asc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_records_rejects_bad_rows() {
        let api = MockRemoteApi::new()
            .with_rows("clients", vec![json!({"id": 5})])
            .await;

        let result: ApiResult<Vec<ClientRecord>> =
            fetch_records(&api, "clients", &SelectQuery::new(), &AbortSignal::never()).await;

        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }
}
