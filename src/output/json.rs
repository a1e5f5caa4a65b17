//! JSON output formatting

use chrono::Utc;
use serde::Serialize;

/// Wrapper for JSON output with metadata
#[derive(Debug, Serialize)]
pub struct JsonOutput<T> {
    pub data: T,
    pub meta: Metadata,
}

/// Metadata included in JSON output
#[derive(Debug, Serialize)]
pub struct Metadata {
    /// When this output was produced (RFC 3339)
    pub timestamp: String,

    pub version: String,

    /// Epoch milliseconds of the last successful sync behind `data`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at_ms: Option<i64>,

    /// Bumped each time the synced data actually changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_version: Option<u64>,
}

impl<T> JsonOutput<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            meta: Metadata {
                timestamp: Utc::now().to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                synced_at_ms: None,
                data_version: None,
            },
        }
    }

    /// Attach sync freshness to the metadata
    pub fn synced(mut self, synced_at_ms: Option<i64>, data_version: u64) -> Self {
        self.meta.synced_at_ms = synced_at_ms;
        self.meta.data_version = Some(data_version);
        self
    }
}

/// Format data as pretty-printed JSON
pub fn format_json<T: Serialize + ?Sized>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&JsonOutput::new(data))
}

/// Format synced data with its freshness as pretty-printed JSON
pub fn format_synced_json<T: Serialize + ?Sized>(
    data: &T,
    synced_at_ms: Option<i64>,
    data_version: u64,
) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&JsonOutput::new(data).synced(synced_at_ms, data_version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize)]
    struct TestItem {
        id: String,
    }

    #[test]
    fn test_format_json_basic() {
        let items = vec![TestItem {
            id: "c-1".to_string(),
        }];

        let result = format_json(&items).unwrap();

        assert!(result.contains("\"data\""));
        assert!(result.contains("\"id\": \"c-1\""));
        assert!(result.contains("\"timestamp\""));
        assert!(result.contains("\"version\""));
        assert!(!result.contains("synced_at_ms"));
    }

    #[test]
    fn test_format_json_empty_vec() {
        let items: Vec<TestItem> = vec![];
        let result = format_json(&items).unwrap();

        assert!(result.contains("\"data\": []"));
    }

    #[test]
    fn test_format_synced_json() {
        let result = format_synced_json(&["a"], Some(1_700_000_000_000), 3).unwrap();

        assert!(result.contains("\"synced_at_ms\": 1700000000000"));
        assert!(result.contains("\"data_version\": 3"));
    }
}
