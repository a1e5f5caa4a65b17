//! PulseSync - offline-aware data sync and caching for the client-success
//! dashboard
//!
//! Keeps remote tables fresh (polling, focus and reconnect refetches,
//! retries, single-flight), folds realtime change events into loaded data,
//! suppresses identical payloads, caches sessions with sliding expiry, and
//! serves stored responses when the network is gone.

pub mod abort;
pub mod cache;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod models;
pub mod notify;
pub mod offline;
pub mod output;
pub mod refresh;
pub mod session;
pub mod stabilizer;
pub mod sync;

pub use error::{Error, Result};
