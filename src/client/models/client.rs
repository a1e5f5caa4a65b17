//! Client models

use serde::{Deserialize, Serialize};

use crate::sync::Record;

/// A customer tracked by the client-success team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: String,

    pub name: String,

    /// Lifecycle status, e.g. "active" or "churned"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Account owner email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Health score from 0 to 100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,

    /// Last modification time as reported by the backend (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Record for ClientRecord {
    fn record_id(&self) -> &str {
        &self.id
    }
}
