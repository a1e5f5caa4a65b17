//! Error types for PulseSync

use std::time::Duration;
use thiserror::Error;

/// Result type alias for PulseSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

/// Remote API and network errors.
///
/// `Clone` so a single in-flight fetch can hand the same failure to every
/// caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Authentication failed. Check `api_key` in your pulsesync config.")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded. Retry after {0:?}")]
    RateLimit(Duration),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request aborted: {0}")]
    Aborted(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether the sync layer should retry after this error.
    ///
    /// Timeouts are treated exactly like network failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_)
                | ApiError::Timeout(_)
                | ApiError::ServerError(_)
                | ApiError::RateLimit(_)
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("Failed to connect to API".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Local cache storage errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Could not determine cache directory")]
    NoHome,

    #[error("Cache I/O error: {0}")]
    Io(String),

    #[error("Cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt cache entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Malformed realtime change events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Change event has no record id ({0})")]
    MissingId(String),

    #[error("Unknown change event type: {0}")]
    UnknownEvent(String),

    #[error("Failed to decode record {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("Failed to merge update for record {id}: {reason}")]
    Merge { id: String, reason: String },
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {0}. Create it or pass --config.")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),

    #[error("Remote API not configured. Set `api_url` and `api_key` in the config file.")]
    MissingRemote,

    #[error("Offline cache origin not configured. Set `offline.origin` in the config file.")]
    MissingOrigin,
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_timeout_message() {
        let err = ApiError::Timeout(Duration::from_millis(50));
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("50ms"));
    }

    #[test]
    fn test_api_error_rate_limit() {
        let err = ApiError::RateLimit(Duration::from_secs(30));
        let msg = err.to_string();
        assert!(msg.contains("Rate limit"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_api_error_network() {
        let err = ApiError::Network("Connection refused".to_string());
        assert!(err.to_string().contains("Connection refused"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Network("down".into()).is_transient());
        assert!(ApiError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ApiError::ServerError("502".into()).is_transient());
        assert!(ApiError::RateLimit(Duration::from_secs(1)).is_transient());

        assert!(!ApiError::Unauthorized.is_transient());
        assert!(!ApiError::NotFound("clients".into()).is_transient());
        assert!(!ApiError::Aborted("user".into()).is_transient());
        assert!(!ApiError::InvalidResponse("bad json".into()).is_transient());
    }

    #[test]
    fn test_reconcile_error_messages() {
        let err = ReconcileError::MissingId("UPDATE".to_string());
        assert!(err.to_string().contains("no record id"));

        let err = ReconcileError::Merge {
            id: "c-1".to_string(),
            reason: "invalid type".to_string(),
        };
        assert!(err.to_string().contains("c-1"));
    }

    #[test]
    fn test_cache_error_corrupt() {
        let err = CacheError::Corrupt {
            key: "session.payload".to_string(),
            reason: "EOF".to_string(),
        };
        assert!(err.to_string().contains("session.payload"));
    }

    #[test]
    fn test_config_error_not_found() {
        let err = ConfigError::NotFound("/tmp/x.yaml".to_string());
        assert!(err.to_string().contains("/tmp/x.yaml"));
    }

    #[test]
    fn test_error_from_api_error() {
        let err: Error = ApiError::Unauthorized.into();

        match err {
            Error::Api(ApiError::Unauthorized) => (),
            _ => panic!("Expected Error::Api(ApiError::Unauthorized)"),
        }
    }

    #[test]
    fn test_error_from_cache_error() {
        let err: Error = CacheError::NoHome.into();

        match err {
            Error::Cache(CacheError::NoHome) => (),
            _ => panic!("Expected Error::Cache(CacheError::NoHome)"),
        }
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_str = "invalid: [yaml: content";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let config_err: ConfigError = yaml_err.into();

        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }
}
