//! Display models for CLI output
//!
//! Converts synced records into table rows and JSON-friendly shapes.

pub mod display;

pub use display::{ClientDisplay, DashboardRecord, MetricDisplay};
