use std::time::Duration;

use serde::Serialize;
use tandem_core::sync::{CycleStats, Scheduler};
use tandem_core::{ConflictStrategy, ScheduleConfig};

use crate::cli::SyncCommands;
use crate::commands::common::{
    format_sync_conflict_lines, format_sync_timestamp, resolve_conflict_id, short_id,
    sync_conflict_to_item, AppContext, SyncConflictItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct SyncStatusItem {
    device_id: String,
    backend: String,
    namespace: String,
    strategy: String,
    last_sync_timestamp: i64,
    last_sync_iso: Option<String>,
    sync_version: u64,
    pending_count: u64,
    conflict_count: u64,
}

pub async fn run_sync(command: Option<SyncCommands>, ctx: &AppContext) -> Result<(), CliError> {
    match command.unwrap_or(SyncCommands::Run { json: false }) {
        SyncCommands::Run { json } => run_sync_once(json, ctx).await.map(|_| ()),
        SyncCommands::Status { json } => run_sync_status(json, ctx).await,
        SyncCommands::Conflicts { limit, all, json } => {
            run_sync_conflicts(limit, all, json, ctx).await
        }
        SyncCommands::Resolve { id, strategy } => {
            run_sync_resolve(&id, strategy.into(), ctx).await
        }
        SyncCommands::Watch { interval, poll } => run_sync_watch(interval, poll, ctx).await,
        SyncCommands::Request => run_sync_request(ctx).await,
    }
}

pub async fn run_sync_once(as_json: bool, ctx: &AppContext) -> Result<CycleStats, CliError> {
    let stats = ctx.reconciler.run_cycle().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", format_cycle_summary(&stats));
        if stats.conflicts_detected > stats.conflicts_resolved {
            println!("Open conflicts remain; see `tandem sync conflicts`.");
        }
    }
    Ok(stats)
}

pub async fn run_sync_status(as_json: bool, ctx: &AppContext) -> Result<(), CliError> {
    let metadata = ctx.reconciler.metadata().await?;
    let status = SyncStatusItem {
        device_id: ctx.device_id.to_string(),
        backend: ctx.backend.clone(),
        namespace: ctx.profile.sync.namespace.clone(),
        strategy: ctx.profile.sync.strategy.to_string(),
        last_sync_timestamp: metadata.last_sync_timestamp,
        last_sync_iso: metadata
            .has_synced()
            .then(|| format_sync_timestamp(metadata.last_sync_timestamp)),
        sync_version: metadata.sync_version,
        pending_count: metadata.pending_count,
        conflict_count: metadata.conflict_count,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Device:     {}", status.device_id);
    println!("Backend:    {}", status.backend);
    println!("Namespace:  {}", status.namespace);
    println!("Strategy:   {}", status.strategy);
    println!(
        "Last sync:  {}",
        status.last_sync_iso.as_deref().unwrap_or("never")
    );
    println!("Cycles:     {}", status.sync_version);
    println!("Pending:    {}", status.pending_count);
    println!("Conflicts:  {}", status.conflict_count);
    Ok(())
}

pub async fn run_sync_conflicts(
    limit: usize,
    include_resolved: bool,
    as_json: bool,
    ctx: &AppContext,
) -> Result<(), CliError> {
    let conflicts = ctx
        .reconciler
        .ledger()
        .recent(limit, include_resolved)
        .await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_resolve(
    query: &str,
    strategy: ConflictStrategy,
    ctx: &AppContext,
) -> Result<(), CliError> {
    let conflict = resolve_conflict_id(query, ctx.store.as_ref()).await?;
    let resolved = ctx
        .reconciler
        .resolve_conflict(&conflict.id, strategy)
        .await?;
    println!(
        "Resolved {} {} with {strategy} at v{} ({})",
        resolved.record_type,
        short_id(resolved.id.as_str()),
        resolved.version,
        resolved.sync_status
    );
    Ok(())
}

pub async fn run_sync_request(ctx: &AppContext) -> Result<(), CliError> {
    ctx.reconciler.request_sync().await?;
    println!("Asked other devices to sync");
    Ok(())
}

/// Run the background scheduler until Ctrl-C
pub async fn run_sync_watch(
    interval_secs: u64,
    poll_secs: u64,
    ctx: &AppContext,
) -> Result<(), CliError> {
    let config = watch_schedule(interval_secs, poll_secs)?;
    let handle = Scheduler::new(ctx.reconciler.clone(), config).spawn();
    let mut reports = handle.subscribe();
    handle.sync_now();

    println!("Watching for changes on {} (Ctrl-C to stop)", ctx.backend);
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = reports.borrow_and_update().clone();
                if let Some(report) = report {
                    if report.stats.changed_anything() || !report.stats.is_clean() {
                        println!(
                            "[{}] {}",
                            report.trigger.as_str(),
                            format_cycle_summary(&report.stats)
                        );
                    }
                }
            }
        }
    }

    handle.shutdown().await;
    println!("Stopped watching");
    Ok(())
}

pub fn watch_schedule(interval_secs: u64, poll_secs: u64) -> Result<ScheduleConfig, CliError> {
    if interval_secs == 0 {
        return Err(CliError::Config(
            "Sync interval must be at least one second".to_string(),
        ));
    }
    let config = ScheduleConfig::default().with_sync_interval(Duration::from_secs(interval_secs));
    Ok(if poll_secs == 0 {
        config.without_polling()
    } else {
        config.with_poll_interval(Duration::from_secs(poll_secs))
    })
}

pub fn format_cycle_summary(stats: &CycleStats) -> String {
    if stats.skipped {
        return "Sync skipped: another cycle is running".to_string();
    }
    let mut summary = format!(
        "Sync completed: pushed {}, adopted {}, confirmed {}, re-pushed {}",
        stats.pushed, stats.adopted, stats.confirmed, stats.repushed
    );
    if stats.conflicts_detected > 0 || stats.conflicts_resolved > 0 {
        summary.push_str(&format!(
            ", conflicts {} detected / {} resolved",
            stats.conflicts_detected, stats.conflicts_resolved
        ));
    }
    if stats.failed > 0 {
        summary.push_str(&format!(", {} failed", stats.failed));
    }
    summary
}
