//! CLI command definitions and handlers

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod cache;
pub mod context;
pub mod offline;
pub mod replay;
pub mod session;
pub mod status;
pub mod watch;

pub use args::{GlobalOptions, OutputFormat, WatchTable};
pub use context::CommandContext;

/// PulseSync - offline-aware sync engine for the client-success dashboard
#[derive(Parser, Debug)]
#[command(name = "pulsesync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "PULSESYNC_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "PULSESYNC_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "PULSESYNC_DEBUG", hide_env = true)]
    pub debug: bool,

    /// Keep session state in memory only
    #[arg(long, global = true, env = "PULSESYNC_NO_CACHE", hide_env = true)]
    pub no_cache: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show configuration, session and cache status
    Status,

    /// Keep a table in sync and print it whenever it changes
    #[command(after_help = "\
Examples:
  pulsesync watch clients
  pulsesync watch metrics --interval 10
  pulsesync watch clients --once --format json")]
    Watch {
        /// Table to watch
        #[arg(value_enum)]
        table: WatchTable,

        /// Fetch once, print, and exit
        #[arg(long)]
        once: bool,

        /// Poll interval in seconds (overrides config)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },

    /// Apply a file of realtime change events to a freshly fetched table
    #[command(after_help = "\
Each line of the file is one change event:
  {\"eventType\":\"UPDATE\",\"table\":\"clients\",\"new\":{\"id\":\"c-1\",\"status\":\"churned\"}}")]
    Replay {
        /// Table to replay against
        #[arg(value_enum)]
        table: WatchTable,

        /// JSON-lines file of change events
        events: PathBuf,
    },

    /// Inspect the cached session
    #[command(subcommand)]
    Session(SessionCommands),

    /// Manage the local cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Manage the offline response cache
    #[command(subcommand)]
    Offline(OfflineCommands),
}

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Show the active session without extending it
    Show,
    /// Forget the active session
    Clear,
}

/// Cache management subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Status,
    /// Clear all cached data
    Clear,
    /// Remove expired entries
    Prune,
    /// Print cache directory path
    Path,
}

/// Offline cache subcommands
#[derive(Subcommand, Debug)]
pub enum OfflineCommands {
    /// Precache the configured version's assets
    Install,
    /// Activate a waiting version
    Activate,
    /// Show lifecycle state and stored responses
    Status,
    /// Fetch a URL through the offline cache
    Fetch {
        /// Absolute URL, or a path relative to `offline.origin`
        url: String,

        /// Treat as a full-page navigation
        #[arg(long)]
        navigate: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch() {
        let cli = Cli::parse_from(["pulsesync", "watch", "metrics", "--once", "--interval", "5"]);
        match cli.command {
            Commands::Watch {
                table,
                once,
                interval,
            } => {
                assert_eq!(table, WatchTable::Metrics);
                assert!(once);
                assert_eq!(interval, Some(5));
            }
            other => panic!("Expected watch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_offline_fetch() {
        let cli = Cli::parse_from(["pulsesync", "offline", "fetch", "/", "--navigate"]);
        assert!(matches!(
            cli.command,
            Commands::Offline(OfflineCommands::Fetch { navigate: true, .. })
        ));
    }

    #[test]
    fn test_unknown_table_rejected() {
        assert!(Cli::try_parse_from(["pulsesync", "watch", "invoices"]).is_err());
    }
}
