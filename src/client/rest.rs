//! REST implementation of [`RemoteApi`]

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client as HttpClient, StatusCode};

use super::rate_limit::{RouteGroup, RouteLimiters};
use super::{ApiResult, RemoteApi, SelectQuery};
use crate::abort::{AbortSignal, or_abort};
use crate::error::ApiError;

/// Transport-level timeout. Per-query timeouts are applied by the sync layer.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Row endpoint prefix
const REST_PREFIX: &str = "/rest/v1";

/// Health probe path
const HEALTH_PATH: &str = "/auth/v1/health";

/// Data API client
pub struct RestClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    limiters: RouteLimiters,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> ApiResult<Self> {
        let http = HttpClient::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
            limiters: RouteLimiters::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str, params: &[(String, String)]) -> ApiResult<serde_json::Value> {
        let group = RouteGroup::from_path(path);
        self.limiters.wait_for(group).await;

        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .query(params)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(ApiError::from)?;

        let status = response.status();
        match status {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ApiError::Unauthorized),
            StatusCode::NOT_FOUND => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Resource not found".to_string());
                Err(ApiError::NotFound(error_msg))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                self.limiters.activate(group);
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(ApiError::RateLimit(Duration::from_secs(retry_after)))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Bad request".to_string());
                Err(ApiError::BadRequest(error_msg))
            }
            status if status.is_server_error() => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("Server error: {}", status));
                Err(ApiError::ServerError(error_msg))
            }
            _ => Err(ApiError::InvalidResponse(format!(
                "Unexpected status code: {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl RemoteApi for RestClient {
    async fn select(
        &self,
        table: &str,
        query: &SelectQuery,
        signal: &AbortSignal,
    ) -> ApiResult<Vec<serde_json::Value>> {
        signal.check()?;

        let path = format!("{}/{}", REST_PREFIX, table);
        let params = query.to_params();
        let body = or_abort(self.get_json(&path, &params), signal).await?;

        match body {
            serde_json::Value::Array(rows) => Ok(rows),
            other => Err(ApiError::InvalidResponse(format!(
                "Expected an array of rows from {}, got {}",
                table,
                json_kind(&other)
            ))),
        }
    }

    async fn ping(&self) -> ApiResult<()> {
        self.get_json(HEALTH_PATH, &[]).await.map(|_| ())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::{AbortReason, create_abort_controller};
    use mockito::Matcher;

    #[test]
    fn test_client_creation() {
        let client = RestClient::new("https://db.example.com/", "anon-key").unwrap();
        assert_eq!(client.base_url(), "https://db.example.com");
    }

    #[tokio::test]
    async fn test_select_sends_filters_and_keys() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/clients")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), "*".into()),
                Matcher::UrlEncoded("status".into(), "eq.active".into()),
            ]))
            .match_header("apikey", "anon-key")
            .match_header("authorization", "Bearer anon-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"c-1","name":"Acme"}]"#)
            .create_async()
            .await;

        let client = RestClient::new(server.url(), "anon-key").unwrap();
        let rows = client
            .select(
                "clients",
                &SelectQuery::new().eq("status", "active"),
                &AbortSignal::never(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Acme");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let client = RestClient::new(server.url(), "k").unwrap();

        let _unauth = server
            .mock("GET", "/rest/v1/secret")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;
        let _busy = server
            .mock("GET", "/rest/v1/busy")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/rest/v1/broken")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let q = SelectQuery::new();
        let never = AbortSignal::never();

        assert_eq!(
            client.select("secret", &q, &never).await,
            Err(ApiError::Unauthorized)
        );
        assert_eq!(
            client.select("busy", &q, &never).await,
            Err(ApiError::RateLimit(Duration::from_secs(7)))
        );
        assert_eq!(
            client.select("broken", &q, &never).await,
            Err(ApiError::ServerError("maintenance".to_string()))
        );
    }

    #[tokio::test]
    async fn test_non_array_body_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/v1/clients")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"message":"oops"}"#)
            .create_async()
            .await;

        let client = RestClient::new(server.url(), "k").unwrap();
        let result = client
            .select("clients", &SelectQuery::new(), &AbortSignal::never())
            .await;

        assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_aborted_signal_skips_request() {
        let client = RestClient::new("http://127.0.0.1:9", "k").unwrap();
        let (controller, signal) = create_abort_controller();
        controller.abort(AbortReason::Teardown);

        let result = client.select("clients", &SelectQuery::new(), &signal).await;
        assert_eq!(result, Err(ApiError::Aborted("Teardown".to_string())));
    }

    #[tokio::test]
    async fn test_ping() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/auth/v1/health")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = RestClient::new(server.url(), "k").unwrap();
        assert!(client.ping().await.is_ok());
    }
}
