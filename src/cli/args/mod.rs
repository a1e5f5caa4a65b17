//! Shared CLI argument types

mod common;
mod global;

pub use common::{OutputFormat, WatchTable};
pub use global::GlobalOptions;
