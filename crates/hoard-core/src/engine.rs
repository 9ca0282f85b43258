//! Entry point for front ends: runs, checks, restores and catalog browsing.

use crate::catalog::{Backup, CatalogStats, Entry};
use crate::context::EngineContext;
use crate::control::{CancelToken, RunControl};
use crate::error::{Error, Result};
use crate::events::RunEvent;
use crate::integrity::{IntegrityChecker, IntegrityReport};
use crate::interceptor::ActivationGuard;
use crate::restore::{RestoreOptions, RestoreReport, Restorer};
use crate::runner::{RunReport, SnapshotRunner};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::broadcast;

/// A search hit with the entry's path inside its backup.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: Entry,
    pub path: String,
}

pub struct BackupEngine {
    ctx: Arc<EngineContext>,
}

impl BackupEngine {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.ctx.events().subscribe()
    }

    /// Run a backup on the calling thread.
    pub fn run_backup(&self, control: Arc<RunControl>) -> RunReport {
        SnapshotRunner::new(&self.ctx, control).run()
    }

    /// Run a backup on a dedicated worker thread.
    pub fn spawn_backup(&self) -> Result<RunHandle> {
        let control = RunControl::new();
        let ctx = Arc::clone(&self.ctx);
        let worker_control = Arc::clone(&control);
        let thread = thread::Builder::new()
            .name("hoard-backup".to_string())
            .spawn(move || SnapshotRunner::new(&ctx, worker_control).run())?;
        Ok(RunHandle { control, thread })
    }

    /// Verify every stored blob. `stop_at_first_mismatch` overrides the configured mode.
    pub fn check(
        &self,
        stop_at_first_mismatch: Option<bool>,
        cancel: &CancelToken,
    ) -> Result<IntegrityReport> {
        let _guard = ActivationGuard::activate(self.ctx.interceptors())?;
        let catalog = self.ctx.open_catalog()?;
        let store = self.ctx.content_store();
        let stop = stop_at_first_mismatch
            .unwrap_or(self.ctx.config().integrity.stop_at_first_mismatch);
        IntegrityChecker::new(&catalog, &store)
            .with_events(self.ctx.events())
            .stop_at_first_mismatch(stop)
            .check(cancel)
    }

    pub fn restore(
        &self,
        backup_id: i64,
        entry_ids: &[i64],
        target: &Path,
        options: RestoreOptions,
        cancel: &CancelToken,
    ) -> Result<RestoreReport> {
        let _guard = ActivationGuard::activate(self.ctx.interceptors())?;
        let catalog = self.ctx.open_catalog()?;
        let store = self.ctx.content_store();
        Restorer::new(&catalog, &store, options)
            .with_events(self.ctx.events())
            .restore(backup_id, entry_ids, target, cancel)
    }

    pub fn list_backups(&self) -> Result<Vec<Backup>> {
        Ok(self.ctx.open_catalog()?.list_backups(None, None)?)
    }

    /// Children of `parent_id` in a backup, or its location roots when `None`.
    pub fn browse(&self, backup_id: i64, parent_id: Option<i64>) -> Result<Vec<Entry>> {
        let catalog = self.ctx.open_catalog()?;
        if catalog.get_backup(backup_id)?.is_none() {
            return Err(Error::NotFound {
                what: format!("backup {}", backup_id),
            });
        }
        Ok(catalog.list_children(backup_id, parent_id)?)
    }

    pub fn search(&self, backup_id: Option<i64>, needle: &str, limit: i64) -> Result<Vec<SearchHit>> {
        let catalog = self.ctx.open_catalog()?;
        catalog
            .search_entries(backup_id, needle, limit)?
            .into_iter()
            .map(|entry| {
                let path = catalog.entry_path(entry.id)?.join("/");
                Ok(SearchHit { entry, path })
            })
            .collect()
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        Ok(self.ctx.open_catalog()?.stats()?)
    }
}

/// A backup running on its worker thread.
pub struct RunHandle {
    control: Arc<RunControl>,
    thread: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<RunReport> {
        self.thread
            .join()
            .map_err(|_| Error::Other("backup worker panicked".to_string()))
    }
}
