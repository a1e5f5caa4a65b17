//! Watch command: keep one table in sync and print it when it changes

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use colored::Colorize;
use log::warn;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::{CommandContext, GlobalOptions, OutputFormat, WatchTable};
use crate::client::models::{ClientRecord, MetricRecord};
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::Result;
use crate::models::DashboardRecord;
use crate::notify::Notice;
use crate::output::{self, formatters::format_epoch_ms, json::format_synced_json};
use crate::refresh::RefreshOrchestrator;
use crate::stabilizer::{Debouncer, Throttle};
use crate::sync::{Collection, QuerySnapshot};

/// How often the remote is probed for reachability
const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Bursts of changes inside this window render once
const RENDER_DEBOUNCE: Duration = Duration::from_millis(250);

/// At most one sync-failure line per window
const FAILURE_NOTICE_WINDOW: Duration = Duration::from_secs(30);

pub async fn run(
    opts: &GlobalOptions,
    table: WatchTable,
    once: bool,
    interval: Option<u64>,
) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    match table {
        WatchTable::Clients => watch::<ClientRecord>(&ctx, once, interval).await,
        WatchTable::Metrics => watch::<MetricRecord>(&ctx, once, interval).await,
    }
}

async fn watch<R: DashboardRecord>(
    ctx: &CommandContext,
    once: bool,
    interval: Option<u64>,
) -> Result<()> {
    let mut options = ctx.config.sync.query_options();
    if let Some(secs) = interval {
        options.poll_interval = Duration::from_secs(secs.max(1));
    }

    let query = ctx.collection_query::<R>(R::TABLE, options);
    let orchestrator = RefreshOrchestrator::new(query.clone(), Arc::clone(&ctx.sync.notifier));

    if once {
        orchestrator.refresh_data().await?;
        return render(R::TABLE, &query.snapshot(), ctx.format);
    }

    let connectivity = Arc::new(Connectivity::new(true));
    let _monitor = ConnectivityMonitor::spawn(
        Arc::clone(&connectivity),
        Arc::clone(&ctx.client),
        PROBE_INTERVAL,
    );
    let _recovery = orchestrator.watch_connectivity(&connectivity);

    let mut snapshots = query.subscribe();
    let mut notices = ctx.sync.notifier.subscribe();
    let failures = Throttle::new(FAILURE_NOTICE_WINDOW);

    let rendered = Arc::new(AtomicU64::new(0));
    let debouncer = {
        let query = query.clone();
        let rendered = Arc::clone(&rendered);
        let format = ctx.format;
        Debouncer::new(RENDER_DEBOUNCE, move || {
            let snapshot = query.snapshot();
            if rendered.swap(snapshot.data_version, Ordering::SeqCst) == snapshot.data_version {
                return;
            }
            if let Err(e) = render(R::TABLE, &snapshot, format) {
                warn!("Failed to render {}: {}", R::TABLE, e);
            }
        })
    };

    let handle = query.start(&connectivity);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut seen_version = 0;
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let version = snapshots.borrow_and_update().data_version;
                if version != seen_version {
                    seen_version = version;
                    debouncer.call();
                    if let Err(e) = ctx.touch_session() {
                        warn!("Failed to extend session: {}", e);
                    }
                }
            }
            notice = notices.recv() => match notice {
                Ok(notice) => report(&notice, &failures),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => break,
        }
    }

    debouncer.cancel();
    handle.stop();
    Ok(())
}

fn render<R: DashboardRecord>(
    table: &str,
    snapshot: &QuerySnapshot<Collection<R>>,
    format: OutputFormat,
) -> Result<()> {
    let Some(data) = snapshot.data.as_ref() else {
        return Ok(());
    };
    let rows: Vec<R::Row> = data.iter().map(|record| record.to_row()).collect();

    match format {
        OutputFormat::Json => {
            let json = format_synced_json(
                &rows,
                snapshot.freshness.last_updated_ms,
                snapshot.data_version,
            )?;
            println!("{}", json);
        }
        OutputFormat::Table => output::print(&rows, format)?,
        OutputFormat::Pretty => {
            let synced = snapshot
                .freshness
                .last_updated_ms
                .map(format_epoch_ms)
                .unwrap_or_else(|| "never".to_string());
            println!(
                "{} {} ({} rows, synced {})",
                "●".green(),
                table.bold(),
                rows.len(),
                synced
            );
            output::print(&rows, format)?;
        }
    }

    Ok(())
}

fn report(notice: &Notice, failures: &Throttle) {
    match notice {
        Notice::SyncFailed { key, message } => {
            failures.call(|| eprintln!("{} Sync failed for {}: {}", "✗".red(), key, message));
        }
        Notice::Offline => eprintln!("{} Offline, showing last synced data", "⚠".yellow()),
        Notice::BackOnline => eprintln!("{} Back online, refreshing", "✓".green()),
    }
}
