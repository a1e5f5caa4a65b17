//! Common CLI types shared across commands

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty format - human-optimized rich formatting
    #[default]
    Pretty,
    /// Table format - one row per record
    Table,
    /// JSON format - structured for scripts
    Json,
}

/// Tables the dashboard knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WatchTable {
    /// Customer accounts
    Clients,
    /// Per-client metric samples
    Metrics,
}

impl WatchTable {
    pub fn name(&self) -> &'static str {
        match self {
            WatchTable::Clients => "clients",
            WatchTable::Metrics => "metrics",
        }
    }
}
