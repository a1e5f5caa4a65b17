//! Metric display model

use serde::Serialize;
use tabled::Tabled;

use super::DashboardRecord;
use super::common::short_timestamp;
use crate::client::models::MetricRecord;

/// Metric row for table/JSON output.
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct MetricDisplay {
    #[tabled(rename = "METRIC ID")]
    pub id: String,

    #[tabled(rename = "CLIENT")]
    pub client_id: String,

    #[tabled(rename = "METRIC")]
    pub name: String,

    #[tabled(rename = "VALUE")]
    pub value: String,

    #[tabled(rename = "RECORDED")]
    pub recorded: String,
}

impl From<&MetricRecord> for MetricDisplay {
    fn from(metric: &MetricRecord) -> Self {
        Self {
            id: metric.id.clone(),
            client_id: metric.client_id.clone(),
            name: metric.name.clone(),
            value: format_value(metric.value),
            recorded: short_timestamp(metric.recorded_at.as_deref()),
        }
    }
}

/// Whole numbers without a fraction, others to two places
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

impl DashboardRecord for MetricRecord {
    const TABLE: &'static str = "metrics";

    type Row = MetricDisplay;

    fn to_row(&self) -> MetricDisplay {
        MetricDisplay::from(self)
    }
}
