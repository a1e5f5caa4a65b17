//! Replay command: push recorded change events through the realtime path

use std::path::Path;

use colored::Colorize;
use log::warn;
use serde_json::json;

use crate::cli::{CommandContext, GlobalOptions, OutputFormat, WatchTable};
use crate::client::models::{ClientRecord, MetricRecord};
use crate::error::{Error, Result};
use crate::models::DashboardRecord;
use crate::output::{self, json::format_synced_json};
use crate::sync::{ChangePayload, RefreshTrigger, change_channel, spawn_reconciler};

/// Parsed event file.
#[derive(Debug, Default)]
pub struct EventFile {
    pub payloads: Vec<ChangePayload>,
    /// Non-blank lines that were not valid change payloads
    pub skipped: usize,
}

/// Parse JSON lines into change payloads, skipping blank and malformed lines.
pub fn parse_events(contents: &str) -> EventFile {
    let mut file = EventFile::default();
    for (n, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ChangePayload>(line) {
            Ok(payload) => file.payloads.push(payload),
            Err(e) => {
                warn!("Skipping line {}: {}", n + 1, e);
                file.skipped += 1;
            }
        }
    }
    file
}

pub async fn run(opts: &GlobalOptions, table: WatchTable, events: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(events)?;
    let file = parse_events(&contents);

    let ctx = CommandContext::new(opts)?;
    match table {
        WatchTable::Clients => replay::<ClientRecord>(&ctx, file).await,
        WatchTable::Metrics => replay::<MetricRecord>(&ctx, file).await,
    }
}

async fn replay<R: DashboardRecord>(ctx: &CommandContext, file: EventFile) -> Result<()> {
    let query = ctx.collection_query::<R>(R::TABLE, ctx.config.sync.query_options());
    let before = query.refresh(RefreshTrigger::Manual).await?.len();

    let total = file.payloads.len();
    let (publisher, subscriber) = change_channel(total.max(1));
    let reconciler = spawn_reconciler(query.clone(), subscriber.for_table(R::TABLE));

    for payload in file.payloads {
        publisher.publish(payload).await;
    }
    drop(publisher);

    let applied = reconciler
        .await
        .map_err(|e| Error::Other(format!("Reconciler task failed: {}", e)))?;

    let snapshot = query.snapshot();
    let Some(data) = snapshot.data.as_ref() else {
        return Ok(());
    };
    let rows: Vec<R::Row> = data.iter().map(|record| record.to_row()).collect();

    match ctx.format {
        OutputFormat::Json => {
            let value = json!({
                "events": total,
                "applied": applied,
                "skipped_lines": file.skipped,
                "rows_before": before,
                "rows_after": rows.len(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            println!(
                "{}",
                format_synced_json(
                    &rows,
                    snapshot.freshness.last_updated_ms,
                    snapshot.data_version
                )?
            );
        }
        format => {
            println!(
                "{} Applied {} of {} events to {} ({} → {} rows)",
                "✓".green(),
                applied,
                total,
                R::TABLE.bold(),
                before,
                rows.len()
            );
            if file.skipped > 0 {
                println!("{} Skipped {} malformed lines", "⚠".yellow(), file.skipped);
            }
            output::print(&rows, format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events_skips_bad_lines() {
        let contents = r#"
{"eventType":"INSERT","table":"clients","new":{"id":"c-9","name":"Initech"}}

not json
{"eventType":"DELETE","table":"clients","old":{"id":"c-1"}}
{"table":"clients"}
"#;

        let file = parse_events(contents);
        assert_eq!(file.payloads.len(), 2);
        assert_eq!(file.skipped, 2);
        assert_eq!(file.payloads[0].event_type, "INSERT");
        assert_eq!(file.payloads[1].event_type, "DELETE");
    }
}
