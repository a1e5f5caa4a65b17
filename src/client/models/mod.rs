//! Dashboard data models
//!
//! Rows returned by the data API for the tables the dashboard tracks.

mod client;
mod metric;

pub use client::ClientRecord;
pub use metric::MetricRecord;
