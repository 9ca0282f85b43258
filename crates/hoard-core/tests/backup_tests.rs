mod common;

use common::*;
use hoard_core::catalog::{Catalog, Entry, EntryKind};
use hoard_core::{
    DedupMode, EngineContext, LocationConfig, RunControl, RunEvent, RunOutcome, RunState,
    Severity, SnapshotRunner,
};
use std::fs::{self, File, FileTimes};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn run(ctx: &EngineContext) -> hoard_core::RunReport {
    SnapshotRunner::new(ctx, RunControl::new()).run()
}

fn file_entries(catalog: &Catalog, backup_id: i64) -> Vec<Entry> {
    let mut files = Vec::new();
    let mut pending = vec![None];
    while let Some(parent) = pending.pop() {
        for entry in catalog.list_children(backup_id, parent).unwrap() {
            match entry.kind {
                EntryKind::Folder => pending.push(Some(entry.id)),
                _ => files.push(entry),
            }
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

/// Layout:
///   source/
///     a.txt        ("alpha")
///     docs/
///       b.txt      ("bravo")
///       copy.txt   ("alpha")   ← same bytes as a.txt
fn create_source(root: &Path) {
    write_file(&root.join("a.txt"), b"alpha");
    write_file(&root.join("docs/b.txt"), b"bravo");
    write_file(&root.join("docs/copy.txt"), b"alpha");
}

#[test]
fn test_unchanged_files_are_stored_once() {
    let source = tempdir().unwrap();
    let output = tempdir().unwrap();
    create_source(source.path());
    let ctx = context_for(output.path(), &[source.path()]);

    let first = run(&ctx);
    assert_eq!(first.outcome, RunOutcome::Completed);
    assert_eq!(first.stats.files, 3);
    assert_eq!(first.stats.folders, 2);
    assert_eq!(first.stats.stored, 2);
    assert_eq!(first.stats.reused, 1);

    let second = run(&ctx);
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.stats.stored, 0);
    assert_eq!(second.stats.reused, 3);

    let catalog = ctx.open_catalog().unwrap();
    assert_eq!(catalog.count_file_contents().unwrap(), 2);
    let before = file_entries(&catalog, first.backup_id.unwrap());
    let after = file_entries(&catalog, second.backup_id.unwrap());
    assert_eq!(before.len(), 3);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.name, new.name);
        assert_eq!(old.file_content_id, new.file_content_id);
    }
    assert_eq!(catalog.get_backup(second.backup_id.unwrap()).unwrap().unwrap().entry_count, Some(5));
}

#[test]
fn test_changed_file_gets_new_content() {
    let source = tempdir().unwrap();
    let output = tempdir().unwrap();
    create_source(source.path());
    let ctx = context_for(output.path(), &[source.path()]);

    let first = run(&ctx);
    // Same length, different bytes
    write_file(&source.path().join("docs/b.txt"), b"BRAVO");
    let second = run(&ctx);
    assert_eq!(second.stats.stored, 1);

    let catalog = ctx.open_catalog().unwrap();
    let old = file_entries(&catalog, first.backup_id.unwrap());
    let new = file_entries(&catalog, second.backup_id.unwrap());
    let old_b = old.iter().find(|e| e.name == "b.txt").unwrap();
    let new_b = new.iter().find(|e| e.name == "b.txt").unwrap();
    assert_ne!(old_b.file_content_id, new_b.file_content_id);
    assert_eq!(catalog.count_file_contents().unwrap(), 3);
}

#[test]
fn test_timestamp_mode_trusts_mtime_and_length() {
    let source = tempdir().unwrap();
    let output = tempdir().unwrap();
    create_source(source.path());
    let mut config = config_for(output.path(), &[source.path()]);
    config.dedup_mode = DedupMode::Timestamp;
    let ctx = EngineContext::new(config);

    let first = run(&ctx);
    assert_eq!(first.stats.stored, 3);

    let second = run(&ctx);
    assert_eq!(second.stats.reused, 3);
    assert_eq!(second.stats.stored, 0);

    // Rewrite with the same length and put the old mtime back: not noticed
    let path = source.path().join("a.txt");
    let mtime = fs::metadata(&path).unwrap().modified().unwrap();
    write_file(&path, b"ALPHA");
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_times(FileTimes::new().set_modified(mtime))
        .unwrap();
    let third = run(&ctx);
    assert_eq!(third.stats.reused, 3);

    // A new mtime is noticed
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_times(FileTimes::new().set_modified(SystemTime::now() + Duration::from_secs(60)))
        .unwrap();
    let fourth = run(&ctx);
    assert_eq!(fourth.stats.stored, 1);
    assert_eq!(fourth.stats.reused, 2);
}

#[test]
fn test_locked_file_becomes_failed_entry_with_warning() {
    let output = tempdir().unwrap();
    let tree = Arc::new(Mutex::new(MemNode::folder(
        "data",
        vec![MemNode::file("ok.txt", b"fine"), MemNode::locked("inbox.pst")],
    )));
    let mut config = config_for(output.path(), &[]);
    config.locations.push(LocationConfig::new("mem://data"));
    let ctx = with_mem_location(EngineContext::new(config), tree);
    let mut events = ctx.events().subscribe();

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::CompletedWithWarnings);
    assert_eq!(report.stats.failed_files, 1);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].severity, Severity::Warning);
    assert_eq!(report.issues[0].path, "mem:/data/inbox.pst");

    let catalog = ctx.open_catalog().unwrap();
    let files = file_entries(&catalog, report.backup_id.unwrap());
    assert_eq!(files[0].name, "inbox.pst");
    assert_eq!(files[0].kind, EntryKind::FailedFile);
    assert_eq!(files[0].file_content_id, None);
    assert_eq!(files[1].kind, EntryKind::File);

    let mut saw_warning = false;
    let mut last = None;
    while let Ok(event) = events.try_recv() {
        if let RunEvent::ItemError(issue) = &event {
            saw_warning |= issue.severity == Severity::Warning;
        }
        last = Some(event);
    }
    assert!(saw_warning);
    assert!(matches!(
        last,
        Some(RunEvent::RunEnded {
            outcome: RunOutcome::CompletedWithWarnings,
            ..
        })
    ));
}

#[test]
fn test_traversal_is_sorted_and_honours_overrides() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    write_file(&source.path().join("b.txt"), b"b");
    write_file(&source.path().join("a.txt"), b"a");
    write_file(&source.path().join("scratch.tmp"), b"tmp");
    write_file(&source.path().join("cache/blob.bin"), b"cache");

    let mut config = config_for(output.path(), &[]);
    config
        .locations
        .push(LocationConfig::named(source.path().to_string_lossy(), "Documents"));
    config.ignore_patterns = vec!["*.tmp".to_string(), "cache".to_string()];
    let ctx = EngineContext::new(config);

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.files, 2);

    let catalog = ctx.open_catalog().unwrap();
    let backup_id = report.backup_id.unwrap();
    let roots = catalog.list_children(backup_id, None).unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].name, "Documents");
    let children = catalog.list_children(backup_id, Some(roots[0].id)).unwrap();
    let names: Vec<&str> = children.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    // Insert order follows name order
    assert!(children[0].id < children[1].id);
}

#[test]
fn test_missing_location_is_an_error_but_run_completes() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let missing = source.path().join("does-not-exist");
    let ctx = context_for(output.path(), &[&missing, source.path()]);

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::CompletedWithWarnings);
    assert_eq!(report.errors().count(), 1);
    assert_eq!(report.stats.files, 3);

    let catalog = ctx.open_catalog().unwrap();
    assert!(catalog
        .get_backup(report.backup_id.unwrap())
        .unwrap()
        .unwrap()
        .is_completed());
}

#[test]
fn test_interceptor_failure_aborts_before_backup_row() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let xor = XorInterceptor::new(0x5a);
    let ctx = context_for(output.path(), &[source.path()])
        .with_interceptor(xor.clone())
        .with_interceptor(Arc::new(BrokenInterceptor));

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.backup_id, None);
    assert!(report.issues[0].message.contains("broken"));
    // The one that did start is released again
    assert_eq!(*xor.activations.lock().unwrap(), 1);
    assert_eq!(*xor.destroyed.lock().unwrap(), 1);
    assert!(!ctx.layout().catalog_path.exists());
}

#[test]
fn test_interceptor_transforms_stored_blobs() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    write_file(&source.path().join("secret.txt"), b"attack at dawn");
    let mut config = config_for(output.path(), &[source.path()]);
    config.compression = hoard_core::Compression::None;
    let xor = XorInterceptor::new(0x20);
    let ctx = EngineContext::new(config).with_interceptor(xor.clone());

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(*xor.destroyed.lock().unwrap(), 1);

    let catalog = ctx.open_catalog().unwrap();
    let content = &catalog.list_file_contents().unwrap()[0];
    let on_disk = fs::read(ctx.content_store().absolute_path(&content.path)).unwrap();
    let expected: Vec<u8> = b"attack at dawn".iter().map(|b| b ^ 0x20).collect();
    assert_eq!(on_disk, expected);
    assert_eq!(content.length, 14);
    assert_eq!(
        content.checksum,
        hoard_core::hasher::strong::hash_data(b"attack at dawn")
    );
}

#[test]
fn test_stop_before_first_node_keeps_empty_backup() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let ctx = context_for(output.path(), &[source.path()]);
    let control = RunControl::new();
    control.stop();

    let report = SnapshotRunner::new(&ctx, control).run();
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.stats.files, 0);

    let catalog = ctx.open_catalog().unwrap();
    let backup = catalog.get_backup(report.backup_id.unwrap()).unwrap().unwrap();
    assert_eq!(backup.entry_count, Some(0));
}

#[test]
fn test_paused_run_waits_for_resume() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let ctx = context_for(output.path(), &[source.path()]);
    let mut events = ctx.events().subscribe();
    let control = RunControl::new();
    control.pause();

    let report = thread::scope(|scope| {
        let worker = scope.spawn(|| SnapshotRunner::new(&ctx, control.clone()).run());
        loop {
            match events.blocking_recv() {
                Ok(RunEvent::StatusChanged {
                    state: RunState::Paused,
                    ..
                }) => break,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished());
        control.resume();
        worker.join().unwrap()
    });

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.files, 3);
}

#[test]
fn test_insufficient_space_aborts_before_running() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let mut config = config_for(output.path(), &[source.path()]);
    config.retention.max_disk_fill_rate_percent = Some(80);
    let ctx = EngineContext::new(config).with_space_probe(ScriptedProbe::new(&[5.0]));

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.backup_id, None);
    assert!(report.issues[0].message.contains("Insufficient disk space"));
    assert_eq!(ctx.open_catalog().unwrap().stats().unwrap().backups, 0);
}

#[test]
fn test_space_running_out_mid_run_leaves_no_partial_backup() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let mut config = config_for(output.path(), &[source.path()]);
    config.retention.max_disk_fill_rate_percent = Some(80);
    config.disk_check_interval = 1;
    // Fine for the pre-run check, then full for good
    let ctx = EngineContext::new(config).with_space_probe(ScriptedProbe::new(&[50.0, 5.0]));

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.stats.files, 1);
    let retention = report.retention.as_ref().unwrap();
    assert_eq!(retention.failed_removed, 1);
    assert!(!retention.space_satisfied);

    let catalog = ctx.open_catalog().unwrap();
    assert_eq!(catalog.stats().unwrap().backups, 0);
    assert_eq!(catalog.count_file_contents().unwrap(), 0);
    assert!(ctx.content_store().list_blobs().is_empty());
}

#[test]
fn test_failed_retention_pass_downgrades_outcome() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let mut config = config_for(output.path(), &[source.path()]);
    config.retention.max_disk_fill_rate_percent = Some(80);
    // The pre-run check passes, the retention pass cannot read the volume
    let ctx = EngineContext::new(config).with_space_probe(FailingProbe::after(1));

    let report = run(&ctx);
    assert_eq!(report.outcome, RunOutcome::CompletedWithWarnings);
    assert!(report.retention.is_none());
    assert_eq!(report.errors().count(), 1);
    assert!(report.errors().next().unwrap().message.contains("volume went away"));

    let catalog = ctx.open_catalog().unwrap();
    let backup = catalog.get_backup(report.backup_id.unwrap()).unwrap().unwrap();
    assert!(backup.is_completed());
}

#[test]
fn test_finalize_keeps_bounded_catalog_snapshots() {
    let output = tempdir().unwrap();
    let source = tempdir().unwrap();
    create_source(source.path());
    let mut config = config_for(output.path(), &[source.path()]);
    config.retention.database_backups_to_keep = 2;
    let ctx = EngineContext::new(config);

    for _ in 0..3 {
        assert_eq!(run(&ctx).outcome, RunOutcome::Completed);
    }

    let snapshots: Vec<_> = fs::read_dir(&ctx.layout().snapshots_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(snapshots.len(), 2);
    for dir in snapshots {
        let copy = Catalog::open(&dir.join("catalog.db")).unwrap();
        assert!(!copy.list_completed_backups().unwrap().is_empty());
    }
}
