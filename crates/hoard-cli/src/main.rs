mod commands;
mod logging;
mod progress;

use std::path::Path;
use std::process;
use std::thread;

use anyhow::{bail, Context};
use chrono::Local;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use hoard_core::catalog::{Entry, EntryKind};
use hoard_core::{
    BackupEngine, CancelToken, EngineContext, RestoreOptions, RunOutcome, RunReport,
};
use progress::{format_issue, CliReporter};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Cli::parse();

    let _guard = logging::init_logger(args.verbose);

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    let config = match hoard_core::load_configuration(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    if let Commands::PrintConfig = command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let engine = BackupEngine::new(EngineContext::new(config));
    match command {
        Commands::Backup => run_backup(&engine),
        Commands::Check { exhaustive } => run_check(&engine, exhaustive),
        Commands::Restore {
            backup,
            entry,
            target,
            no_substitute,
        } => run_restore(&engine, backup, entry, &target, !no_substitute),
        Commands::List => run_list(&engine),
        Commands::Browse { backup, parent } => run_browse(&engine, backup, parent),
        Commands::Search {
            needle,
            backup,
            limit,
        } => run_search(&engine, &needle, backup, limit),
        Commands::Stats => run_stats(&engine),
        Commands::PrintConfig => Ok(()),
    }
}

fn run_backup(engine: &BackupEngine) -> anyhow::Result<()> {
    if engine.context().config().locations.is_empty() {
        bail!("No locations configured, nothing to back up");
    }
    let mut events = engine.subscribe();
    let handle = engine.spawn_backup()?;
    let reporter = CliReporter::new();
    reporter.pump(&mut events, || handle.is_finished());
    let report = handle.join()?;

    print_run_summary(&report);
    if report.outcome == RunOutcome::Aborted {
        process::exit(2);
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    println!();
    let outcome = match report.outcome {
        RunOutcome::Completed => "completed".green().bold(),
        RunOutcome::CompletedWithWarnings => "completed with warnings".yellow().bold(),
        RunOutcome::Stopped => "stopped".yellow().bold(),
        RunOutcome::Aborted => "aborted".red().bold(),
    };
    let backup = report
        .backup_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!(
        "Backup {} {} in {}",
        backup.cyan(),
        outcome,
        format!("{:.2}s", report.elapsed.as_secs_f64()).green()
    );
    info!(
        "{} folders, {} files: {} stored ({} bytes), {} reused, {} failed",
        report.stats.folders,
        report.stats.files,
        format!("{}", report.stats.stored).green(),
        report.stats.bytes_stored,
        format!("{}", report.stats.reused).cyan(),
        format!("{}", report.stats.failed_files).red(),
    );
    if let Some(retention) = &report.retention {
        info!(
            "Retention: {} backups removed, {} duplicates merged, {} orphans swept",
            retention.failed_removed
                + retention.expired_removed
                + retention.hourlies_collapsed
                + retention.dailies_collapsed
                + retention.evicted,
            retention.duplicates_merged,
            retention.orphans_removed + retention.stray_blobs_removed,
        );
    }
    if !report.issues.is_empty() {
        println!("{}", "Issues:".bold());
        for issue in &report.issues {
            println!("{}", format_issue(issue));
        }
    }
}

fn run_check(engine: &BackupEngine, exhaustive: bool) -> anyhow::Result<()> {
    let mut events = engine.subscribe();
    let cancel = CancelToken::new();
    let stop_at_first = if exhaustive { Some(false) } else { None };

    let report = thread::scope(|scope| {
        let worker = scope.spawn(|| engine.check(stop_at_first, &cancel));
        CliReporter::new().pump(&mut events, || worker.is_finished());
        worker.join()
    })
    .map_err(|_| anyhow::anyhow!("integrity check panicked"))??;

    println!();
    if report.is_intact() {
        info!(
            "Backup store is {}: {} contents verified, {} checksums upgraded",
            "intact".green().bold(),
            report.checked,
            report.upgraded
        );
        return Ok(());
    }
    error!(
        "Backup store is {}: {} of {} contents checked",
        "NOT intact".red().bold(),
        report.checked,
        report.total
    );
    for mismatch in &report.mismatches {
        println!("  {} {}", "✗".red(), mismatch);
    }
    process::exit(3);
}

fn run_restore(
    engine: &BackupEngine,
    backup_id: i64,
    entry_ids: Vec<i64>,
    target: &Path,
    substitute_failed_files: bool,
) -> anyhow::Result<()> {
    let entry_ids = if entry_ids.is_empty() {
        engine
            .browse(backup_id, None)?
            .into_iter()
            .map(|e| e.id)
            .collect()
    } else {
        entry_ids
    };
    if entry_ids.is_empty() {
        bail!("Backup {} has no entries to restore", backup_id);
    }

    let mut events = engine.subscribe();
    let cancel = CancelToken::new();
    let options = RestoreOptions {
        substitute_failed_files,
    };
    let report = thread::scope(|scope| {
        let worker =
            scope.spawn(|| engine.restore(backup_id, &entry_ids, target, options, &cancel));
        CliReporter::new().pump(&mut events, || worker.is_finished());
        worker.join()
    })
    .map_err(|_| anyhow::anyhow!("restore panicked"))?
    .with_context(|| format!("restoring backup {} into {}", backup_id, target.display()))?;

    println!();
    info!(
        "Restored {} folders and {} files ({} bytes), {} taken from earlier backups",
        report.folders,
        format!("{}", report.files).green(),
        report.bytes,
        format!("{}", report.substituted).cyan()
    );
    for (path, reason) in &report.skipped {
        println!("  {} {}: {}", "skipped".yellow(), path.display(), reason);
    }
    Ok(())
}

fn run_list(engine: &BackupEngine) -> anyhow::Result<()> {
    let backups = engine.list_backups()?;
    if backups.is_empty() {
        println!("No backups yet");
        return Ok(());
    }
    for backup in backups {
        let started = backup.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        let status = match backup.entry_count {
            Some(count) => format!("{} entries", count).normal(),
            None => "failed".red(),
        };
        println!("{:>6}  {}  {}", backup.id.to_string().cyan(), started, status);
    }
    Ok(())
}

fn describe(entry: &Entry) -> ColoredString {
    match entry.kind {
        EntryKind::Folder => format!("{}/", entry.name).blue().bold(),
        EntryKind::File => entry.name.normal(),
        EntryKind::FailedFile => format!("{} (not captured)", entry.name).red(),
    }
}

fn run_browse(engine: &BackupEngine, backup_id: i64, parent: Option<i64>) -> anyhow::Result<()> {
    for entry in engine.browse(backup_id, parent)? {
        let modified = entry
            .modified
            .map(|m| m.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:>8}  {:16}  {}", entry.id, modified, describe(&entry));
    }
    Ok(())
}

fn run_search(
    engine: &BackupEngine,
    needle: &str,
    backup_id: Option<i64>,
    limit: i64,
) -> anyhow::Result<()> {
    let hits = engine.search(backup_id, needle, limit)?;
    if hits.is_empty() {
        println!("Nothing matches '{}'", needle);
    }
    for hit in hits {
        println!(
            "{:>6} {:>8}  {}",
            hit.entry.backup_id.to_string().cyan(),
            hit.entry.id,
            hit.path
        );
    }
    Ok(())
}

fn run_stats(engine: &BackupEngine) -> anyhow::Result<()> {
    let stats = engine.stats()?;
    println!("Backups:        {} ({} completed)", stats.backups, stats.completed_backups);
    println!("Entries:        {}", stats.entries);
    println!("Stored blobs:   {}", stats.file_contents);
    println!("Stored bytes:   {}", stats.stored_bytes);
    Ok(())
}
