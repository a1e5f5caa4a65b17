//! Offline cache commands

use std::time::Duration;

use colored::Colorize;
use serde_json::json;

use crate::cli::{GlobalOptions, OutputFormat};
use crate::config::Config;
use crate::error::Result;
use crate::offline::{
    ControlMessage, HttpFetcher, HttpRequest, LifecycleState, OfflineCache, SqliteResponseStore,
};
use crate::output::formatters::format_size;
use crate::output::table::format_key_values;

type Cache = OfflineCache<SqliteResponseStore, HttpFetcher>;

fn open(opts: &GlobalOptions) -> Result<Cache> {
    let config = Config::load_at(opts.config_ref())?;
    let offline = config.offline_config()?;
    let timeout = Duration::from_secs(config.sync.request_timeout_secs.max(1));

    let store = SqliteResponseStore::open()?;
    let fetcher = HttpFetcher::new(timeout)?;
    OfflineCache::new(offline, store, fetcher)
}

fn describe(state: &LifecycleState) -> String {
    match state {
        LifecycleState::Idle => "idle".to_string(),
        LifecycleState::Installing(v) => format!("installing {}", v),
        LifecycleState::Waiting(v) => format!("{} waiting", v),
        LifecycleState::Activating(v) => format!("activating {}", v),
        LifecycleState::Active(v) => format!("{} active", v),
    }
}

fn print_state(format: OutputFormat, state: &LifecycleState, changed: bool) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let value = json!({ "state": state, "changed": changed });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ if changed => println!("{} Offline cache {}", "✓".green(), describe(state)),
        _ => println!("{} Offline cache {}", "○".dimmed(), describe(state)),
    }
    Ok(())
}

/// Precache the configured version
pub async fn install(opts: &GlobalOptions) -> Result<()> {
    let cache = open(opts)?;
    let before = cache.state();
    let state = cache.install().await?;
    print_state(opts.format, &state, state != before)?;

    if matches!(state, LifecycleState::Waiting(_)) && opts.format != OutputFormat::Json {
        println!("  → Run 'pulsesync offline activate' to switch now");
    }
    Ok(())
}

/// Activate a waiting version
pub fn activate(opts: &GlobalOptions) -> Result<()> {
    let cache = open(opts)?;
    let changed = cache.handle_message(ControlMessage::SkipWaiting)?;
    print_state(opts.format, &cache.state(), changed)
}

/// Show lifecycle state and stored responses
pub fn status(opts: &GlobalOptions) -> Result<()> {
    let cache = open(opts)?;
    let status = cache.status()?;

    if opts.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let mut pairs = vec![
        ("State", describe(&status.state)),
        ("Origin", cache.config().origin.clone()),
        ("Active", status.active.clone().unwrap_or_else(|| "-".to_string())),
        ("Waiting", status.waiting.clone().unwrap_or_else(|| "-".to_string())),
    ];
    for (bucket, count) in &status.buckets {
        pairs.push(("Bucket", format!("{} ({} responses)", bucket, count)));
    }
    println!("{}", format_key_values(&pairs));
    Ok(())
}

/// Fetch a URL through the offline cache
pub async fn fetch(opts: &GlobalOptions, url: &str, navigate: bool) -> Result<()> {
    let cache = open(opts)?;
    let url = cache.config().resolve(url);
    let request = if navigate {
        HttpRequest::navigate(url)
    } else {
        HttpRequest::get(url)
    };

    let outcome = cache.handle_fetch(&request).await?;

    match opts.format {
        OutputFormat::Json => {
            let value = json!({
                "url": request.url,
                "status": outcome.response.status,
                "source": outcome.source,
                "headers": outcome.response.headers,
                "body_bytes": outcome.response.body.len(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => {
            println!(
                "{} {} via {:?} ({})",
                outcome.response.status,
                request.url.cyan(),
                outcome.source,
                format_size(outcome.response.body.len())
            );
        }
    }
    Ok(())
}
