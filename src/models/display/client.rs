//! Client display model

use serde::Serialize;
use tabled::Tabled;

use super::DashboardRecord;
use super::common::{EMPTY, or_empty, short_timestamp, truncate};
use crate::client::models::ClientRecord;

/// Client row for table/JSON output.
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct ClientDisplay {
    #[tabled(rename = "CLIENT ID")]
    pub id: String,

    #[tabled(rename = "NAME")]
    pub name: String,

    #[tabled(rename = "STATUS")]
    pub status: String,

    #[tabled(rename = "OWNER")]
    pub owner: String,

    #[tabled(rename = "HEALTH")]
    pub health: String,

    #[tabled(rename = "UPDATED")]
    pub updated: String,
}

impl From<&ClientRecord> for ClientDisplay {
    fn from(client: &ClientRecord) -> Self {
        Self {
            id: client.id.clone(),
            name: truncate(&client.name, 40),
            status: or_empty(client.status.as_deref()),
            owner: or_empty(client.owner.as_deref()),
            health: client
                .health_score
                .map(|score| format!("{:.0}", score))
                .unwrap_or_else(|| EMPTY.to_string()),
            updated: short_timestamp(client.updated_at.as_deref()),
        }
    }
}

impl DashboardRecord for ClientRecord {
    const TABLE: &'static str = "clients";

    type Row = ClientDisplay;

    fn to_row(&self) -> ClientDisplay {
        ClientDisplay::from(self)
    }
}
