//! Status command implementation

use colored::Colorize;
use serde_json::json;

use crate::cache::{CacheStats, CacheStorage, CacheTtl, TtlCache};
use crate::cli::context::open_sessions;
use crate::cli::{GlobalOptions, OutputFormat};
use crate::clock::{self, Clock};
use crate::config::Config;
use crate::error::Result;
use crate::output::formatters::{format_epoch_ms, format_remaining, format_size};

/// Show configuration, session and cache status
pub fn run(opts: &GlobalOptions) -> Result<()> {
    let config_path = Config::resolve_path(opts.config_ref())?;
    let config = Config::load_at(opts.config_ref()).ok();

    let clock = clock::system();
    let session_ttl = config
        .as_ref()
        .map(|c| c.cache.session_ttl())
        .unwrap_or(CacheTtl::SESSION);
    let session = open_sessions(clock.clone(), opts.no_cache, session_ttl)?.peek();

    let stats = if opts.no_cache {
        None
    } else {
        Some(TtlCache::new(CacheStorage::open()?, clock.clone()).stats()?)
    };

    if opts.format == OutputFormat::Json {
        let value = json!({
            "config_path": config_path.display().to_string(),
            "config_found": config.is_some(),
            "api_url": config.as_ref().and_then(|c| c.api_url.clone()),
            "api_key_configured": config.as_ref().is_some_and(|c| c.api_key.is_some()),
            "tables": config.as_ref().map(|c| c.tables.clone()).unwrap_or_default(),
            "session": session.as_ref().map(|s| json!({
                "api_url": s.payload.api_url,
                "started_at": s.payload.started_at,
                "expires_at_ms": s.expires_at_ms,
            })),
            "cache": stats.as_ref().map(|s| json!({
                "valid_entries": s.valid_entries,
                "expired_entries": s.expired_entries,
                "total_size_bytes": s.total_size_bytes,
            })),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}\n", "PulseSync Status".bold());

    let Some(config) = config else {
        println!("{} Configuration not found", "✗".red());
        println!("  → Create {}", config_path.display().to_string().cyan());
        println!();
        return Ok(());
    };

    println!(
        "Config file: {}",
        config_path.display().to_string().cyan()
    );
    println!();

    match config.validate_remote() {
        Ok((url, _)) => println!("{} Remote: {}", "✓".green(), url),
        Err(_) => {
            println!("{} Remote API not configured", "✗".red());
            println!("  → Set api_url and api_key in the config file");
        }
    }

    if config.tables.is_empty() {
        println!("{} No tables listed", "○".dimmed());
    } else {
        println!("{} Tables: {}", "✓".green(), config.tables.join(", "));
    }

    match session {
        Some(record) => {
            let remaining = record.expires_at_ms - clock.now_ms();
            println!(
                "{} Session active (expires in {}, at {})",
                "✓".green(),
                format_remaining(remaining),
                format_epoch_ms(record.expires_at_ms)
            );
        }
        None => println!(
            "{} No active session (opens on next sync)",
            "○".dimmed()
        ),
    }

    if let Some(stats) = stats {
        print_cache_line(&stats);
    }

    println!();
    Ok(())
}

fn print_cache_line(stats: &CacheStats) {
    println!(
        "{} Cache: {} valid, {} expired, {}",
        "○".dimmed(),
        stats.valid_entries,
        stats.expired_entries,
        format_size(stats.total_size_bytes)
    );
}
