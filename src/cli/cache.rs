//! Cache management commands

use serde_json::json;

use crate::cache::{CacheStorage, TtlCache};
use crate::cli::OutputFormat;
use crate::clock;
use crate::error::Result;
use crate::output::formatters::{format_epoch_ms, format_size};

fn open() -> Result<TtlCache<CacheStorage>> {
    Ok(TtlCache::new(CacheStorage::open()?, clock::system()))
}

fn cache_path() -> String {
    CacheStorage::cache_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Show cache status/statistics
pub fn status(format: OutputFormat) -> Result<()> {
    let stats = open()?.stats()?;

    match format {
        OutputFormat::Json => {
            let value = json!({
                "total_entries": stats.total_entries,
                "valid_entries": stats.valid_entries,
                "expired_entries": stats.expired_entries,
                "total_size_bytes": stats.total_size_bytes,
                "total_size_human": format_size(stats.total_size_bytes),
                "oldest_entry_ms": stats.oldest_entry,
                "newest_entry_ms": stats.newest_entry,
                "path": cache_path(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => {
            println!("Cache Status");
            println!("────────────────────────────────────────");
            println!("Location:       {}", cache_path());
            println!("Valid entries:  {}", stats.valid_entries);
            println!("Expired:        {}", stats.expired_entries);
            println!("Total size:     {}", format_size(stats.total_size_bytes));

            if let Some(oldest) = stats.oldest_entry {
                println!("Oldest entry:   {}", format_epoch_ms(oldest));
            }
            if let Some(newest) = stats.newest_entry {
                println!("Newest entry:   {}", format_epoch_ms(newest));
            }
        }
    }

    Ok(())
}

/// Clear all cache entries
pub fn clear(format: OutputFormat) -> Result<()> {
    let removed = open()?.clear_all()?;

    match format {
        OutputFormat::Json => {
            let value = json!({ "entries_removed": removed, "success": true });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ if removed > 0 => println!("Cleared {} cache entries", removed),
        _ => println!("Cache was already empty"),
    }

    Ok(())
}

/// Remove expired entries
pub fn prune(format: OutputFormat) -> Result<()> {
    let removed = open()?.purge_expired()?;

    match format {
        OutputFormat::Json => {
            let value = json!({ "entries_pruned": removed, "success": true });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => println!("Pruned {} expired entries", removed),
    }

    Ok(())
}

/// Show cache path
pub fn path() -> Result<()> {
    let path = CacheStorage::cache_dir()?;
    println!("{}", path.display());
    Ok(())
}
