//! Post-run retention: failed-run cleanup, age limits, calendar collapse,
//! disk-space eviction, duplicate consolidation and garbage collection.

use crate::catalog::{Backup, Catalog};
use crate::config::RetentionConfig;
use crate::content_store::ContentStore;
use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::space::SpaceProbe;
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, Utc, Weekday};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub failed_removed: usize,
    pub expired_removed: usize,
    pub hourlies_collapsed: usize,
    pub dailies_collapsed: usize,
    pub evicted: usize,
    /// `false` when eviction ran out of backups before reaching the threshold.
    pub space_satisfied: bool,
    pub duplicates_merged: usize,
    pub entries_repointed: usize,
    pub orphans_removed: usize,
    pub stray_blobs_removed: usize,
    pub snapshots_pruned: usize,
}

/// Result of one eviction loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub evicted: usize,
    pub satisfied: bool,
}

pub struct RetentionManager<'a> {
    catalog: &'a Catalog,
    store: &'a ContentStore,
    config: &'a RetentionConfig,
    probe: &'a dyn SpaceProbe,
    snapshots_dir: &'a Path,
    now: DateTime<Utc>,
}

impl<'a> RetentionManager<'a> {
    pub fn new(ctx: &'a EngineContext, catalog: &'a Catalog, store: &'a ContentStore) -> Self {
        Self {
            catalog,
            store,
            config: &ctx.config().retention,
            probe: ctx.space_probe(),
            snapshots_dir: &ctx.layout().snapshots_dir,
            now: Utc::now(),
        }
    }

    /// Evaluate age windows against `now` instead of the wall clock.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// The full pass, in order. Each step sees the result of the previous one.
    pub fn run(&self) -> Result<RetentionReport> {
        let _span = info_span!("retention").entered();
        let mut report = RetentionReport {
            failed_removed: self.remove_failed_backups()?,
            expired_removed: self.remove_expired_backups()?,
            hourlies_collapsed: self.collapse_hourlies()?,
            dailies_collapsed: self.collapse_dailies()?,
            ..Default::default()
        };

        let eviction = self.evict_for_space()?;
        report.evicted = eviction.evicted;
        report.space_satisfied = eviction.satisfied;
        if !eviction.satisfied {
            warn!("Disk space threshold not met even after evicting every completed backup");
        }

        let (merged, repointed) = self.consolidate_duplicates()?;
        report.duplicates_merged = merged;
        report.entries_repointed = repointed;
        report.orphans_removed = self.sweep_orphans()?;
        report.stray_blobs_removed = self.sweep_stray_blobs()?;
        report.snapshots_pruned = self.prune_database_snapshots()?;

        info!(
            "Retention pass done: {} failed, {} expired, {}+{} collapsed, {} evicted, {} orphans removed",
            report.failed_removed,
            report.expired_removed,
            report.hourlies_collapsed,
            report.dailies_collapsed,
            report.evicted,
            report.orphans_removed
        );
        Ok(report)
    }

    /// Step 1: backups that never got an entry count.
    pub fn remove_failed_backups(&self) -> Result<usize> {
        let failed = self.catalog.list_failed_backups()?;
        for backup in &failed {
            info!("Removing failed backup {} from {}", backup.id, backup.started_at);
            self.catalog.delete_backup(backup.id)?;
        }
        Ok(failed.len())
    }

    /// Step 2: completed backups older than `max_age_days`.
    pub fn remove_expired_backups(&self) -> Result<usize> {
        let Some(max_age_days) = self.config.max_age_days else {
            return Ok(0);
        };
        // An age reaching past the earliest representable date expires nothing.
        let Some(cutoff) = Duration::try_days(i64::from(max_age_days))
            .and_then(|age| self.now.checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let mut removed = 0;
        for backup in self.catalog.list_completed_backups()? {
            if backup.started_at < cutoff {
                debug!("Backup {} is older than {} days", backup.id, max_age_days);
                self.catalog.delete_backup(backup.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Step 3: one backup per calendar day between the hourly and daily windows.
    pub fn collapse_hourlies(&self) -> Result<usize> {
        let newer_than = self.now - Duration::days(i64::from(self.config.keep_dailies_days));
        let older_than = self.now - Duration::days(i64::from(self.config.keep_hourlies_days));
        self.collapse(newer_than, older_than, |date| date)
    }

    /// Step 4: one backup per calendar week beyond the daily window.
    pub fn collapse_dailies(&self) -> Result<usize> {
        let older_than = self.now - Duration::days(i64::from(self.config.keep_dailies_days));
        let week_start = self.config.week_start;
        self.collapse(DateTime::<Utc>::MIN_UTC, older_than, |date| {
            start_of_week(date, week_start)
        })
    }

    /// Keep only the newest completed backup per period among those started
    /// in `[newer_than, older_than)`. `period_of` maps a local date to its period key.
    fn collapse<F>(
        &self,
        newer_than: DateTime<Utc>,
        older_than: DateTime<Utc>,
        period_of: F,
    ) -> Result<usize>
    where
        F: Fn(NaiveDate) -> NaiveDate,
    {
        let mut periods: BTreeMap<NaiveDate, Vec<Backup>> = BTreeMap::new();
        for backup in self.catalog.list_completed_backups()? {
            if backup.started_at >= newer_than && backup.started_at < older_than {
                let local_date = backup.started_at.with_timezone(&Local).date_naive();
                periods.entry(period_of(local_date)).or_default().push(backup);
            }
        }

        let mut removed = 0;
        for (period, mut backups) in periods {
            // Oldest first, so everything but the last goes
            backups.sort_by_key(|b| (b.started_at, b.id));
            backups.pop();
            for backup in backups {
                debug!("Collapsing backup {} into period starting {}", backup.id, period);
                self.catalog.delete_backup(backup.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Free space below `100 - max_disk_fill_rate_percent`, as a percentage.
    fn required_free_percent(&self) -> Option<f64> {
        self.config
            .max_disk_fill_rate_percent
            .map(|fill| 100.0 - f64::from(fill.min(100)))
    }

    /// Step 5: delete the oldest completed backup, then sweep orphans, until
    /// the free-space threshold holds or nothing is left to evict.
    pub fn evict_for_space(&self) -> Result<Eviction> {
        let Some(required) = self.required_free_percent() else {
            return Ok(Eviction {
                evicted: 0,
                satisfied: true,
            });
        };

        let mut evicted = 0;
        loop {
            let free = self.probe.usage(self.store.root())?.free_percent();
            if free >= required {
                return Ok(Eviction {
                    evicted,
                    satisfied: true,
                });
            }
            let Some(oldest) = self.catalog.oldest_completed_backup()? else {
                return Ok(Eviction {
                    evicted,
                    satisfied: false,
                });
            };
            info!(
                "Free space {:.1}% below {:.1}%, evicting backup {} from {}",
                free, required, oldest.id, oldest.started_at
            );
            self.catalog.delete_backup(oldest.id)?;
            self.sweep_orphans()?;
            evicted += 1;
        }
    }

    /// Eviction as a precondition: fails with `InsufficientSpace` when the
    /// threshold cannot be met.
    pub fn ensure_free_space(&self) -> Result<usize> {
        let eviction = self.evict_for_space()?;
        if eviction.satisfied {
            return Ok(eviction.evicted);
        }
        let available_percent = self.probe.usage(self.store.root())?.free_percent();
        Err(Error::InsufficientSpace {
            available_percent,
            required_percent: self.required_free_percent().unwrap_or(0.0),
        })
    }

    /// Step 6: repoint entries of duplicate content rows to the oldest row of
    /// each group. The losers become orphans for the sweep.
    /// Returns (rows merged away, entries repointed).
    pub fn consolidate_duplicates(&self) -> Result<(usize, usize)> {
        let batch_size = self.config.consolidation_batch_size.max(1);
        let mut merged = 0;
        let mut repointed = 0;
        for group in self.catalog.duplicate_content_groups()? {
            let Some((&survivor, duplicates)) = group.split_first() else {
                continue;
            };
            repointed += self
                .catalog
                .repoint_entries(duplicates, survivor, batch_size)?;
            merged += duplicates.len();
            debug!(
                "Merged {} duplicate content rows into {}",
                duplicates.len(),
                survivor
            );
        }
        Ok((merged, repointed))
    }

    /// Step 7: content rows nothing references, with their blobs.
    ///
    /// The row goes first; a blob that then fails to delete is left for the
    /// stray-blob sweep.
    pub fn sweep_orphans(&self) -> Result<usize> {
        let orphans = self.catalog.unused_file_contents()?;
        for content in &orphans {
            self.catalog.delete_file_content(content.id)?;
            if let Err(e) = self.store.remove(&content.path) {
                warn!("Could not delete blob {}: {}", content.path, e);
            }
        }
        if !orphans.is_empty() {
            debug!("Swept {} orphaned content rows", orphans.len());
        }
        Ok(orphans.len())
    }

    /// Step 7b: blobs under the date partitions that no content row mentions.
    pub fn sweep_stray_blobs(&self) -> Result<usize> {
        let known = self.catalog.file_content_paths()?;
        let mut removed = 0;
        for blob in self.store.list_blobs() {
            if known.contains(&blob) {
                continue;
            }
            match self.store.remove(&blob) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not delete stray blob {}: {}", blob, e),
            }
        }
        if removed > 0 {
            info!("Removed {} stray blobs", removed);
        }
        Ok(removed)
    }

    /// Step 8: keep the newest `database_backups_to_keep` catalog snapshots.
    pub fn prune_database_snapshots(&self) -> Result<usize> {
        prune_snapshot_dirs(self.snapshots_dir, self.config.database_backups_to_keep)
    }
}

/// First day of the week containing `date`.
pub fn start_of_week(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset = (date.weekday().num_days_from_monday() + 7
        - week_start.num_days_from_monday())
        % 7;
    date - Duration::days(i64::from(offset))
}

/// Remove all but the `keep` newest snapshot folders. Folder names are
/// timestamps, so name order is age order.
pub fn prune_snapshot_dirs(dir: &Path, keep: usize) -> Result<usize> {
    let mut snapshots = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect::<Vec<_>>(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    if snapshots.len() <= keep {
        return Ok(0);
    }
    snapshots.sort();
    let stale = snapshots.len() - keep;
    for path in &snapshots[..stale] {
        fs::remove_dir_all(path)?;
        debug!("Pruned catalog snapshot {}", path.display());
    }
    Ok(stale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_week() {
        // 2024-03-14 is a Thursday
        let date = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert_eq!(
            start_of_week(date, Weekday::Mon),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        assert_eq!(
            start_of_week(date, Weekday::Sun),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
        assert_eq!(start_of_week(date, Weekday::Thu), date);
    }

    #[test]
    fn test_prune_snapshot_dirs_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20240101-000000", "20240102-000000", "20240103-000000"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        assert_eq!(prune_snapshot_dirs(dir.path(), 2).unwrap(), 1);
        assert!(!dir.path().join("20240101-000000").exists());
        assert!(dir.path().join("20240103-000000").exists());
        assert_eq!(prune_snapshot_dirs(&dir.path().join("missing"), 2).unwrap(), 0);
    }
}
