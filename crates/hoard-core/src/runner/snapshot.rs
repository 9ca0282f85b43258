use super::dedup::{ContentResolver, Resolution};
use super::walk::{count_entries, Estimate, IgnoreSet};
use crate::catalog::{Catalog, EntryKind, NewEntry};
use crate::config::{DedupMode, LocationConfig};
use crate::content_store::ContentStore;
use crate::context::EngineContext;
use crate::control::RunControl;
use crate::error::{Error, Result};
use crate::events::{Issue, RunEvent, RunOutcome, RunState, Severity};
use crate::interceptor::ActivationGuard;
use crate::location::{
    is_plain_name, sanitized_name, sorted_children, FileNode, Folder, Location, Node,
};
use crate::retention::{prune_snapshot_dirs, RetentionManager, RetentionReport};
use chrono::{Local, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub folders: u64,
    pub files: u64,
    pub failed_files: u64,
    pub reused: u64,
    pub stored: u64,
    pub bytes_stored: u64,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// `None` when the run ended before its backup row was created.
    pub backup_id: Option<i64>,
    pub outcome: RunOutcome,
    pub stats: RunStats,
    /// Every warning and error, in the order they occurred.
    pub issues: Vec<Issue>,
    pub retention: Option<RetentionReport>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new() -> Self {
        Self {
            backup_id: None,
            outcome: RunOutcome::Aborted,
            stats: RunStats::default(),
            issues: Vec::new(),
            retention: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }
}

/// Whether traversal should go on after a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Executes one backup run: INITIALIZE → RUNNING ⇄ PAUSED → CLEANUP → FINALIZE → ENDED.
pub struct SnapshotRunner<'a> {
    ctx: &'a EngineContext,
    control: Arc<RunControl>,
}

impl<'a> SnapshotRunner<'a> {
    pub fn new(ctx: &'a EngineContext, control: Arc<RunControl>) -> Self {
        Self { ctx, control }
    }

    /// Run to completion. Failures are reported through the outcome and the
    /// issue list, never as a panic or an early return.
    pub fn run(&self) -> RunReport {
        let started = Instant::now();
        let _span = info_span!("backup", output = %self.ctx.output_root().display()).entered();
        let mut report = RunReport::new();
        self.emit_state(RunState::Initialize, None, 0, None);

        let guard = match ActivationGuard::activate(self.ctx.interceptors()) {
            Ok(guard) => guard,
            Err(e) => return self.end_before_start(report, e, started),
        };
        let catalog = match self.ctx.open_catalog() {
            Ok(catalog) => catalog,
            Err(e) => return self.end_before_start(report, e, started),
        };
        let store = self.ctx.content_store();
        let retention = RetentionManager::new(self.ctx, &catalog, &store);

        let result = retention
            .ensure_free_space()
            .and_then(|_| self.execute(&catalog, &store, &retention, &mut report));
        report.outcome = match result {
            Err(e) => {
                error!("Backup aborted: {}", e);
                self.record(&mut report, Severity::Error, String::new(), e.to_string());
                RunOutcome::Aborted
            }
            Ok(Flow::Stop) => RunOutcome::Stopped,
            Ok(Flow::Continue) if report.issues.is_empty() => RunOutcome::Completed,
            Ok(Flow::Continue) => RunOutcome::CompletedWithWarnings,
        };

        self.emit_state(RunState::Cleanup, None, report.stats.files, None);
        match retention.run() {
            Ok(retention_report) => report.retention = Some(retention_report),
            Err(e) => {
                error!("Retention pass failed: {}", e);
                self.record(&mut report, Severity::Error, String::new(), e.to_string());
                if report.outcome == RunOutcome::Completed {
                    report.outcome = RunOutcome::CompletedWithWarnings;
                }
            }
        }

        self.emit_state(RunState::Finalize, None, report.stats.files, None);
        match write_catalog_snapshot(&catalog, &self.ctx.layout().snapshots_dir) {
            Ok(path) => debug!("Catalog snapshot at {}", path.display()),
            Err(e) => {
                warn!("Could not snapshot the catalog: {}", e);
                self.record(&mut report, Severity::Warning, String::new(), e.to_string());
            }
        }
        if let Err(e) = prune_snapshot_dirs(
            &self.ctx.layout().snapshots_dir,
            self.ctx.config().retention.database_backups_to_keep,
        ) {
            warn!("Could not prune catalog snapshots: {}", e);
        }
        drop(catalog);
        drop(guard);

        report.elapsed = started.elapsed();
        self.end(report)
    }

    fn end_before_start(&self, mut report: RunReport, e: Error, started: Instant) -> RunReport {
        error!("Backup could not start: {}", e);
        self.record(&mut report, Severity::Error, String::new(), e.to_string());
        report.outcome = RunOutcome::Aborted;
        report.elapsed = started.elapsed();
        self.end(report)
    }

    fn end(&self, report: RunReport) -> RunReport {
        self.emit_state(RunState::Ended, None, report.stats.files, None);
        self.ctx.events().emit(RunEvent::RunEnded {
            backup_id: report.backup_id,
            outcome: report.outcome,
        });
        info!(
            "Backup {:?} ended {:?} after {:.1}s: {} files ({} stored, {} reused, {} failed), {} issues",
            report.backup_id,
            report.outcome,
            report.elapsed.as_secs_f64(),
            report.stats.files,
            report.stats.stored,
            report.stats.reused,
            report.stats.failed_files,
            report.issues.len()
        );
        report
    }

    /// RUNNING. The entry count is only written when traversal finished or
    /// was stopped; an error leaves the backup failed.
    fn execute(
        &self,
        catalog: &Catalog,
        store: &ContentStore,
        retention: &RetentionManager<'_>,
        report: &mut RunReport,
    ) -> Result<Flow> {
        let config = self.ctx.config();
        let backup_id = catalog.create_backup(Utc::now())?;
        report.backup_id = Some(backup_id);
        info!("Backup {} started", backup_id);

        let ignore = IgnoreSet::new(&config.ignore_patterns);
        let mut locations = Vec::new();
        for location in &config.locations {
            match self.ctx.locations().resolve(&location.uri) {
                Ok(resolved) => locations.push((location, resolved)),
                Err(e) => self.record(report, Severity::Error, location.uri.clone(), e.to_string()),
            }
        }
        let prior_backups = match config.dedup_mode {
            DedupMode::Timestamp => catalog
                .previous_completed_backups(backup_id)?
                .into_iter()
                .map(|b| b.id)
                .collect(),
            DedupMode::Checksum => Vec::new(),
        };

        let estimate = Estimate::default();
        let finished = AtomicBool::new(false);
        let counted: Vec<Arc<dyn Location>> = locations.iter().map(|(_, l)| l.clone()).collect();
        let control: &RunControl = &self.control;

        let flow = thread::scope(|scope| {
            scope.spawn(|| count_entries(&counted, &ignore, control, &finished, &estimate));

            let mut walker = Walker {
                runner: self,
                catalog,
                retention,
                resolver: ContentResolver::new(catalog, store, config.compression),
                backup_id,
                dedup_mode: config.dedup_mode,
                prior_backups: &prior_backups,
                ignore: &ignore,
                estimate: &estimate,
                disk_check_interval: config.disk_check_interval.max(1) as u64,
                processed: 0,
                report,
            };
            let mut result = Ok(Flow::Continue);
            for (location, resolved) in &locations {
                result = walker.backup_location(location, resolved.as_ref());
                if !matches!(result, Ok(Flow::Continue)) {
                    break;
                }
            }
            finished.store(true, Ordering::Relaxed);
            result
        })?;

        let entry_count = catalog.count_entries(backup_id)?;
        catalog.complete_backup(backup_id, entry_count)?;
        info!("Backup {} recorded {} entries", backup_id, entry_count);
        Ok(flow)
    }

    fn record(&self, report: &mut RunReport, severity: Severity, path: String, message: String) {
        let issue = Issue {
            severity,
            path,
            message,
        };
        self.ctx.events().emit(RunEvent::ItemError(issue.clone()));
        report.issues.push(issue);
    }

    fn emit_state(
        &self,
        state: RunState,
        current_path: Option<String>,
        processed: u64,
        total: Option<u64>,
    ) {
        self.ctx.events().emit(RunEvent::StatusChanged {
            state,
            current_path,
            processed,
            total,
        });
    }
}

/// Traversal state for one run.
struct Walker<'w, 'a> {
    runner: &'w SnapshotRunner<'a>,
    catalog: &'w Catalog,
    retention: &'w RetentionManager<'w>,
    resolver: ContentResolver<'w>,
    backup_id: i64,
    dedup_mode: DedupMode,
    /// Earlier completed backups, newest first; empty in checksum mode.
    prior_backups: &'w [i64],
    ignore: &'w IgnoreSet,
    estimate: &'w Estimate,
    disk_check_interval: u64,
    processed: u64,
    report: &'w mut RunReport,
}

impl Walker<'_, '_> {
    /// Errors opening the location only skip that location.
    fn backup_location(&mut self, config: &LocationConfig, location: &dyn Location) -> Result<Flow> {
        if !self.checkpoint() {
            return Ok(Flow::Stop);
        }
        let root = match location.root() {
            Ok(root) => root,
            Err(e) => {
                error!("Location {} is unavailable: {}", location.uri(), e);
                self.issue(Severity::Error, location.uri().to_string(), e.to_string());
                return Ok(Flow::Continue);
            }
        };
        let raw = config.name.as_deref().unwrap_or(&root.meta().name);
        let name = if is_plain_name(raw) {
            raw.to_string()
        } else {
            let fallback = sanitized_name(if raw.is_empty() { location.uri() } else { raw });
            warn!("Root of {} recorded as '{}'", location.uri(), fallback);
            fallback
        };
        debug!("Backing up {} as '{}'", location.uri(), name);

        let prior = self
            .prior_backups
            .iter()
            .map(|&backup_id| Ok((backup_id, self.prior_folder(backup_id, None, &name)?)))
            .collect::<Result<Vec<_>>>()?;
        self.visit_folder(root.as_ref(), None, &name, &prior)
    }

    /// Matching folder entry in an earlier backup, for timestamp mode.
    fn prior_folder(&self, backup_id: i64, parent: Option<i64>, name: &str) -> Result<Option<i64>> {
        Ok(self
            .catalog
            .find_child(backup_id, parent, name)?
            .filter(|e| e.kind == EntryKind::Folder)
            .map(|e| e.id))
    }

    fn visit_folder(
        &mut self,
        folder: &dyn Folder,
        parent_id: Option<i64>,
        name: &str,
        prior: &[(i64, Option<i64>)],
    ) -> Result<Flow> {
        let meta = folder.meta();
        let entry_id = self.catalog.insert_entry(&NewEntry {
            parent_id,
            backup_id: self.backup_id,
            kind: EntryKind::Folder,
            created: meta.created,
            modified: meta.modified,
            hidden: meta.hidden,
            name,
            file_content_id: None,
        })?;
        self.report.stats.folders += 1;
        self.progress(&meta.display_path);

        let children = match sorted_children(folder) {
            Ok(children) => children,
            Err(e) => {
                error!("Could not list {}: {}", meta.display_path, e);
                self.issue(Severity::Error, meta.display_path.clone(), e.to_string());
                return Ok(Flow::Continue);
            }
        };

        for child in children {
            if !self.checkpoint() {
                return Ok(Flow::Stop);
            }
            if self.ignore.is_ignored(child.meta()) {
                debug!("Ignoring {}", child.meta().display_path);
                continue;
            }
            let flow = match &child {
                Node::Folder(sub) => {
                    let sub_prior = self.descend(prior, child.name())?;
                    self.visit_folder(sub.as_ref(), Some(entry_id), child.name(), &sub_prior)
                }
                Node::File(file) => self.visit_file(file.as_ref(), entry_id, prior),
            };
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return Ok(Flow::Stop),
                Err(e) if e.is_fatal_to_run() => return Err(e),
                Err(e) => {
                    error!("Skipping {}: {}", child.meta().display_path, e);
                    self.issue(Severity::Error, child.meta().display_path.clone(), e.to_string());
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn descend(&self, prior: &[(i64, Option<i64>)], name: &str) -> Result<Vec<(i64, Option<i64>)>> {
        prior
            .iter()
            .map(|&(backup_id, parent)| match parent {
                Some(parent) => Ok((backup_id, self.prior_folder(backup_id, Some(parent), name)?)),
                None => Ok((backup_id, None)),
            })
            .collect()
    }

    fn visit_file(
        &mut self,
        file: &dyn FileNode,
        parent_id: i64,
        prior: &[(i64, Option<i64>)],
    ) -> Result<Flow> {
        let meta = file.meta();
        self.progress(&meta.display_path);

        let resolved = match self.dedup_mode {
            DedupMode::Checksum => self.resolver.by_checksum(file),
            DedupMode::Timestamp => self.resolver.by_timestamp(file, prior),
        };
        let (kind, content_id) = match resolved {
            Ok(resolution) => {
                match resolution {
                    Resolution::Reused { .. } => self.report.stats.reused += 1,
                    Resolution::Stored { length, .. } => {
                        self.report.stats.stored += 1;
                        self.report.stats.bytes_stored += length;
                    }
                }
                (EntryKind::File, Some(resolution.content_id()))
            }
            Err(e) if e.is_fatal_to_run() => return Err(e),
            Err(e) => {
                warn!("Could not back up {}: {}", meta.display_path, e);
                self.issue(Severity::Warning, meta.display_path.clone(), e.to_string());
                self.report.stats.failed_files += 1;
                (EntryKind::FailedFile, None)
            }
        };

        self.catalog.insert_entry(&NewEntry {
            parent_id: Some(parent_id),
            backup_id: self.backup_id,
            kind,
            created: meta.created,
            modified: meta.modified,
            hidden: meta.hidden,
            name: &meta.name,
            file_content_id: content_id,
        })?;
        self.report.stats.files += 1;

        if self.report.stats.files % self.disk_check_interval == 0 {
            self.check_disk_space()?;
        }
        Ok(Flow::Continue)
    }

    /// Periodic eviction. Only running out of space ends the run.
    fn check_disk_space(&mut self) -> Result<()> {
        match self.retention.ensure_free_space() {
            Ok(0) => Ok(()),
            Ok(evicted) => {
                info!("Evicted {} backups to keep disk space available", evicted);
                Ok(())
            }
            Err(e) if e.is_fatal_to_run() => Err(e),
            Err(e) => {
                warn!("Disk space check failed: {}", e);
                Ok(())
            }
        }
    }

    /// Safe point between nodes: blocks while paused, false once stopped.
    fn checkpoint(&mut self) -> bool {
        let control = &self.runner.control;
        if control.is_paused() && !control.is_stopped() {
            info!("Backup paused");
            self.runner
                .emit_state(RunState::Paused, None, self.processed, self.estimate.get());
            let go_on = control.checkpoint();
            if go_on {
                info!("Backup resumed");
                self.runner
                    .emit_state(RunState::Running, None, self.processed, self.estimate.get());
            }
            return go_on;
        }
        control.checkpoint()
    }

    fn progress(&mut self, path: &str) {
        self.processed += 1;
        self.runner.emit_state(
            RunState::Running,
            Some(path.to_string()),
            self.processed,
            self.estimate.get(),
        );
    }

    fn issue(&mut self, severity: Severity, path: String, message: String) {
        self.runner.record(self.report, severity, path, message);
    }
}

/// Copy the catalog to a fresh timestamped folder under `snapshots_dir`.
pub fn write_catalog_snapshot(catalog: &Catalog, snapshots_dir: &Path) -> Result<PathBuf> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut dir = snapshots_dir.join(&stamp);
    let mut suffix = 1;
    while dir.exists() {
        dir = snapshots_dir.join(format!("{}-{}", stamp, suffix));
        suffix += 1;
    }
    fs::create_dir_all(&dir)?;
    let path = dir.join(crate::context::CATALOG_FILE);
    catalog.snapshot_to(&path)?;
    Ok(path)
}
