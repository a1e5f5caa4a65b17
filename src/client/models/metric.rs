//! Metric models

use serde::{Deserialize, Serialize};

use crate::sync::Record;

/// A single metric sample for a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,

    /// Owning client ID
    pub client_id: String,

    /// Metric name, e.g. "nps" or "weekly_logins"
    pub name: String,

    pub value: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,
}

impl Record for MetricRecord {
    fn record_id(&self) -> &str {
        &self.id
    }
}
