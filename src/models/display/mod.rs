//! Display model implementations for table and JSON output

mod client;
mod common;
mod metric;

use serde::Serialize;
use tabled::Tabled;

use crate::sync::Record;

pub use client::ClientDisplay;
pub use metric::MetricDisplay;

/// A record type the CLI can fetch by table name and render.
pub trait DashboardRecord: Record {
    /// Remote table holding these records
    const TABLE: &'static str;

    type Row: Tabled + Serialize;

    fn to_row(&self) -> Self::Row;
}
