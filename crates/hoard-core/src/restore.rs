//! Rebuild selected subtrees of a backup into an empty folder.

use crate::catalog::{Backup, Catalog, Entry, EntryKind, FileContent};
use crate::content_store::ContentStore;
use crate::control::CancelToken;
use crate::error::{Error, Result};
use crate::events::{EventBus, RunEvent};
use crate::hasher::{ChecksumKind, HashingWriter};
use crate::location::is_plain_name;
use crate::platform;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Restore a failed file from the nearest earlier backup that captured it.
    pub substitute_failed_files: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            substitute_failed_files: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub folders: u64,
    pub files: u64,
    pub bytes: u64,
    /// Failed files restored from an earlier backup.
    pub substituted: u64,
    /// Items that could not be restored, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

pub struct Restorer<'a> {
    catalog: &'a Catalog,
    store: &'a ContentStore,
    events: Option<&'a EventBus>,
    options: RestoreOptions,
}

impl<'a> Restorer<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a ContentStore, options: RestoreOptions) -> Self {
        Self {
            catalog,
            store,
            events: None,
            options,
        }
    }

    pub fn with_events(mut self, events: &'a EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Restore `entry_ids` of `backup_id`, with everything below them, into
    /// `target`. The target must be empty or not exist yet.
    pub fn restore(
        &self,
        backup_id: i64,
        entry_ids: &[i64],
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<RestoreReport> {
        let _span = info_span!("restore", backup_id).entered();
        let backup = self.catalog.get_backup(backup_id)?.ok_or_else(|| Error::NotFound {
            what: format!("backup {}", backup_id),
        })?;

        let mut roots = Vec::with_capacity(entry_ids.len());
        for &id in entry_ids {
            match self.catalog.get_entry(id)? {
                Some(entry) if entry.backup_id == backup_id => roots.push(entry),
                _ => {
                    return Err(Error::NotFound {
                        what: format!("entry {} in backup {}", id, backup_id),
                    })
                }
            }
        }
        prepare_target(target)?;
        info!(
            "Restoring {} entries of backup {} into {}",
            roots.len(),
            backup_id,
            target.display()
        );

        let mut report = RestoreReport::default();
        for entry in &roots {
            self.restore_entry(&backup, entry, target, cancel, &mut report)?;
        }
        info!(
            "Restore done: {} folders, {} files, {} substituted, {} skipped",
            report.folders,
            report.files,
            report.substituted,
            report.skipped.len()
        );
        Ok(report)
    }

    fn restore_entry(
        &self,
        backup: &Backup,
        entry: &Entry,
        dir: &Path,
        cancel: &CancelToken,
        report: &mut RestoreReport,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !is_plain_name(&entry.name) {
            let reason = format!("entry name {:?} is not a single path component", entry.name);
            skip(report, dir.to_path_buf(), &reason);
            return Ok(());
        }
        let path = dir.join(&entry.name);
        match entry.kind {
            EntryKind::Folder => {
                fs::create_dir_all(&path)?;
                for child in self.catalog.list_children(backup.id, Some(entry.id))? {
                    self.restore_entry(backup, &child, &path, cancel, report)?;
                }
                report.folders += 1;
            }
            EntryKind::File => match entry.file_content_id {
                Some(content_id) => self.restore_content(content_id, &path, report)?,
                None => skip(report, path.clone(), "file has no stored content"),
            },
            EntryKind::FailedFile => {
                let substitute = if self.options.substitute_failed_files {
                    self.find_substitute(backup, entry)?
                } else {
                    None
                };
                match substitute {
                    Some(content_id) => {
                        let before = report.files;
                        self.restore_content(content_id, &path, report)?;
                        if report.files > before {
                            report.substituted += 1;
                        }
                    }
                    None => skip(report, path.clone(), "file was not captured by this backup"),
                }
            }
        }

        if path.exists() {
            self.apply_attributes(entry, &path);
        }
        self.progress(report, &path);
        Ok(())
    }

    /// Content of the nearest earlier backup holding a captured file at the
    /// same logical path.
    fn find_substitute(&self, backup: &Backup, entry: &Entry) -> Result<Option<i64>> {
        let names = self.catalog.entry_path(entry.id)?;
        for earlier in self.catalog.previous_completed_backups(backup.id)? {
            if earlier.started_at > backup.started_at {
                continue;
            }
            if let Some(found) = self.catalog.resolve_path(earlier.id, &names)? {
                if found.kind == EntryKind::File && found.file_content_id.is_some() {
                    debug!(
                        "Substituting {} from backup {}",
                        names.join("/"),
                        earlier.id
                    );
                    return Ok(found.file_content_id);
                }
            }
        }
        Ok(None)
    }

    /// Per-file failures are recorded and skipped; only catalog errors propagate.
    fn restore_content(&self, content_id: i64, path: &Path, report: &mut RestoreReport) -> Result<()> {
        let Some(content) = self.catalog.get_file_content(content_id)? else {
            skip(report, path.to_path_buf(), "content row is missing");
            return Ok(());
        };
        match self.write_file(&content, path) {
            Ok(()) => {
                report.files += 1;
                report.bytes += content.length;
            }
            Err(e) => {
                warn!("Could not restore {}: {}", path.display(), e);
                if let Err(remove_err) = fs::remove_file(path) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        warn!("Could not remove partial {}: {}", path.display(), remove_err);
                    }
                }
                skip(report, path.to_path_buf(), &e.to_string());
            }
        }
        Ok(())
    }

    fn write_file(&self, content: &FileContent, path: &Path) -> Result<()> {
        let mut reader = self
            .store
            .open(&content.path, content.compression, content.length)?;
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut tee = HashingWriter::new(file);
        io::copy(&mut reader, &mut tee)?;
        let (file, digest) = tee.into_parts();
        file.sync_all()?;

        let verified = content.checksum.kind() != ChecksumKind::Strong
            || digest.checksum == content.checksum;
        if digest.length != content.length || !verified {
            return Err(Error::Other(format!(
                "restored bytes do not match content {} ({})",
                content.id, content.path
            )));
        }
        Ok(())
    }

    fn apply_attributes(&self, entry: &Entry, path: &Path) {
        if let Some(modified) = entry.modified {
            if let Err(e) = platform::set_modified(path, modified.into()) {
                debug!("Could not set modification time of {}: {}", path.display(), e);
            }
        }
        if entry.hidden {
            if let Err(e) = platform::set_hidden(path, true) {
                debug!("Could not hide {}: {}", path.display(), e);
            }
        }
    }

    fn progress(&self, report: &RestoreReport, path: &Path) {
        if let Some(events) = self.events {
            events.emit(RunEvent::RestoreProgress {
                restored: report.folders + report.files,
                current_path: path.display().to_string(),
            });
        }
    }
}

fn skip(report: &mut RestoreReport, path: PathBuf, reason: &str) {
    warn!("Skipped {}: {}", path.display(), reason);
    report.skipped.push((path, reason.to_string()));
}

/// The target must be an empty folder; a missing one is created.
fn prepare_target(target: &Path) -> Result<()> {
    match fs::read_dir(target) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(Error::InvalidTarget {
                    path: target.to_path_buf(),
                    reason: "folder is not empty".to_string(),
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(target)?;
            Ok(())
        }
        Err(e) => Err(Error::InvalidTarget {
            path: target.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}
