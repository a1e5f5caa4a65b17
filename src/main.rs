//! PulseSync CLI

use clap::Parser;

use pulsesync::cli::{
    self, CacheCommands, Cli, Commands, GlobalOptions, OfflineCommands, SessionCommands,
};
use pulsesync::error::Result;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise warnings only, or debug with `--debug`.
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Status => cli::status::run(&opts),
        Commands::Watch {
            table,
            once,
            interval,
        } => cli::watch::run(&opts, table, once, interval).await,
        Commands::Replay { table, events } => cli::replay::run(&opts, table, &events).await,
        Commands::Session(cmd) => match cmd {
            SessionCommands::Show => cli::session::show(&opts),
            SessionCommands::Clear => cli::session::clear(&opts),
        },
        Commands::Cache(cmd) => match cmd {
            CacheCommands::Status => cli::cache::status(opts.format),
            CacheCommands::Clear => cli::cache::clear(opts.format),
            CacheCommands::Prune => cli::cache::prune(opts.format),
            CacheCommands::Path => cli::cache::path(),
        },
        Commands::Offline(cmd) => match cmd {
            OfflineCommands::Install => cli::offline::install(&opts).await,
            OfflineCommands::Activate => cli::offline::activate(&opts),
            OfflineCommands::Status => cli::offline::status(&opts),
            OfflineCommands::Fetch { url, navigate } => {
                cli::offline::fetch(&opts, &url, navigate).await
            }
        },
    }
}
