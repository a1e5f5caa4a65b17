//! Session commands

use colored::Colorize;
use serde_json::json;

use crate::cache::CacheTtl;
use crate::cli::context::{Sessions, open_sessions};
use crate::cli::{GlobalOptions, OutputFormat};
use crate::clock::{self, Clock};
use crate::config::Config;
use crate::error::Result;
use crate::output::formatters::{format_epoch_ms, format_remaining};

fn sessions(opts: &GlobalOptions) -> Result<Sessions> {
    // The TTL only matters for writes; a missing config is fine here
    let ttl = Config::load_at(opts.config_ref())
        .map(|c| c.cache.session_ttl())
        .unwrap_or(CacheTtl::SESSION);
    open_sessions(clock::system(), opts.no_cache, ttl)
}

/// Show the active session without extending it
pub fn show(opts: &GlobalOptions) -> Result<()> {
    let session = sessions(opts)?.peek();

    if opts.format == OutputFormat::Json {
        let value = match session {
            Some(record) => json!({
                "active": true,
                "api_url": record.payload.api_url,
                "started_at": record.payload.started_at,
                "expires_at_ms": record.expires_at_ms,
            }),
            None => json!({ "active": false }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match session {
        Some(record) => {
            let remaining = record.expires_at_ms - clock::SystemClock.now_ms();
            println!("{} Session active", "✓".green());
            println!("  Remote:   {}", record.payload.api_url.cyan());
            println!("  Started:  {}", record.payload.started_at);
            println!(
                "  Expires:  {} (in {})",
                format_epoch_ms(record.expires_at_ms),
                format_remaining(remaining)
            );
        }
        None => println!("{} No active session", "○".dimmed()),
    }

    Ok(())
}

/// Forget the active session
pub fn clear(opts: &GlobalOptions) -> Result<()> {
    let sessions = sessions(opts)?;
    let had_session = sessions.peek().is_some();
    sessions.clear();

    match opts.format {
        OutputFormat::Json => {
            let value = json!({ "cleared": had_session, "success": true });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ if had_session => println!("Session cleared"),
        _ => println!("No active session"),
    }

    Ok(())
}
