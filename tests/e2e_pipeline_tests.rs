use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use filetime::{set_file_mtime, FileTime};
use tempfile::tempdir;

use tidyfs::actions::OperationStatus;
use tidyfs::oplog::OperationKind;
use tidyfs::{
    execute, plan, Error, ExecuteOptions, HashMode, Hasher, HashAlgorithm, KeepStrategy,
    OperationLog, ResolutionMode, ScanCache, ScanOptions, ScanReport, Scanner,
};

fn options() -> ScanOptions {
    ScanOptions {
        parallel: false,
        ..ScanOptions::default()
    }
}

fn scan_uncached(root: &Path) -> ScanReport {
    Scanner::new(ScanOptions {
        use_cache: false,
        ..options()
    })
    .scan(root)
    .unwrap()
}

fn relative_names(report: &ScanReport, files: &[tidyfs::FileEntry]) -> Vec<String> {
    files
        .iter()
        .map(|f| {
            f.path
                .strip_prefix(&report.root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

/// Layout:
///   root/
///     a.txt  ("X", older)
///     b.txt  ("X", newer)
///     c.txt  ("Y")
fn create_abc(root: &Path) {
    fs::write(root.join("a.txt"), "X").unwrap();
    fs::write(root.join("b.txt"), "X").unwrap();
    fs::write(root.join("c.txt"), "Y").unwrap();
    set_file_mtime(root.join("a.txt"), FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    set_file_mtime(root.join("b.txt"), FileTime::from_unix_time(1_600_000_100, 0)).unwrap();
}

/// Layout:
///   root/
///     photos/ img1.jpg, img2.jpg (same bytes)
///     backup/ img1.jpg (same bytes)
///     docs/   notes.txt, empty.txt (0 bytes)
///     other/  empty.txt (0 bytes)
fn create_tree(root: &Path) {
    for dir in ["photos", "backup", "docs", "other"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    let image = vec![0xAAu8; 4096];
    fs::write(root.join("photos/img1.jpg"), &image).unwrap();
    fs::write(root.join("photos/img2.jpg"), &image).unwrap();
    fs::write(root.join("backup/img1.jpg"), &image).unwrap();
    fs::write(root.join("docs/notes.txt"), "notes").unwrap();
    fs::write(root.join("docs/empty.txt"), "").unwrap();
    fs::write(root.join("other/empty.txt"), "").unwrap();
}

#[test]
fn test_remove_newest_scenario() {
    let dir = tempdir().unwrap();
    create_abc(dir.path());

    let report = scan_uncached(dir.path());
    assert_eq!(report.duplicate_groups.len(), 1);
    let group = report.duplicate_groups.values().next().unwrap();
    assert_eq!(relative_names(&report, group), vec!["a.txt", "b.txt"]);

    let intents = plan(&report.duplicate_groups, KeepStrategy::Newest);
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].keep.name, "b.txt");
    assert_eq!(intents[0].target.name, "a.txt");

    let mut log = OperationLog::open(dir.path().join("state/operations.json")).unwrap();
    let result = execute(
        &intents,
        &ResolutionMode::Remove,
        &ExecuteOptions::default(),
        Some(&mut log),
    )
    .unwrap();

    assert_eq!(result.completed_count(), 1);
    assert!(!dir.path().join("a.txt").exists());
    assert!(dir.path().join("b.txt").exists());
    assert!(dir.path().join("c.txt").exists());

    let ops = log.operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::Delete);
    assert!(!ops[0].can_undo);
    assert!(matches!(log.undo(ops[0].id), Err(Error::NotUndoable(_))));
}

#[test]
fn test_rescan_after_touch_misses_only_touched_file() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    create_abc(dir.path());

    let mut scanner = Scanner::new(options()).with_cache(ScanCache::open(cache_dir.path()).unwrap());
    let first = scanner.scan(dir.path()).unwrap();
    assert_eq!(first.cache_hits, 0);
    assert_eq!(first.cache_misses, 3);

    // content unchanged, mtime moved well past the tolerance
    set_file_mtime(dir.path().join("a.txt"), FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

    let second = scanner.scan(dir.path()).unwrap();
    assert_eq!(second.cache_misses, 1);
    assert_eq!(second.cache_hits, 2);
    assert_eq!(second.duplicate_groups, scan_uncached(dir.path()).duplicate_groups);
}

#[test]
fn test_mtime_drift_within_tolerance_is_a_hit() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, "X").unwrap();
    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let mut scanner = Scanner::new(options()).with_cache(ScanCache::open(cache_dir.path()).unwrap());
    scanner.scan(dir.path()).unwrap();

    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 500_000_000)).unwrap();
    let report = scanner.scan(dir.path()).unwrap();
    assert_eq!(report.cache_hits, 1);
    assert_eq!(report.cache_misses, 0);
}

#[test]
fn test_cached_scan_matches_uncached_scan() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    create_tree(dir.path());

    let mut scanner = Scanner::new(options()).with_cache(ScanCache::open(cache_dir.path()).unwrap());
    scanner.scan(dir.path()).unwrap();
    let cached = scanner.scan(dir.path()).unwrap();
    let uncached = scan_uncached(dir.path());

    assert_eq!(cached.cache_hits, 4);
    assert_eq!(cached.entries, uncached.entries);
    assert_eq!(cached.duplicate_groups, uncached.duplicate_groups);
    assert_eq!(cached.by_extension, uncached.by_extension);
    assert_eq!(cached.total_size, uncached.total_size);

    // a fresh cache instance reads the same state from disk
    let mut reopened = Scanner::new(options()).with_cache(ScanCache::open(cache_dir.path()).unwrap());
    assert_eq!(reopened.scan(dir.path()).unwrap().cache_hits, 4);
}

#[test]
fn test_zero_byte_files_never_group() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());

    let report = scan_uncached(dir.path());
    assert_eq!(report.total_files, 6);
    assert_eq!(report.duplicate_groups.len(), 1);
    let group = report.duplicate_groups.values().next().unwrap();
    assert_eq!(
        relative_names(&report, group),
        vec!["backup/img1.jpg", "photos/img1.jpg", "photos/img2.jpg"]
    );
    assert!(report
        .duplicate_groups
        .values()
        .flatten()
        .all(|f| f.size > 0));
}

#[test]
fn test_whole_report_is_cached_per_root() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    create_tree(dir.path());

    let mut scanner = Scanner::new(options()).with_cache(ScanCache::open(cache_dir.path()).unwrap());
    let report = scanner.scan(dir.path()).unwrap();

    let mut cache = ScanCache::open(cache_dir.path()).unwrap();
    let stored = cache.get(&report.root).unwrap();
    assert_eq!(stored.entries, report.entries);
    assert_eq!(stored.duplicate_groups, report.duplicate_groups);

    cache.invalidate(&report.root);
    assert!(ScanCache::open(cache_dir.path()).unwrap().get(&report.root).is_none());
}

#[test]
fn test_unwritable_cache_does_not_fail_scan() {
    let dir = tempdir().unwrap();
    let state = tempdir().unwrap();
    let cache_dir = state.path().join("cache");
    create_abc(dir.path());

    let cache = ScanCache::open(&cache_dir).unwrap();
    // replace the cache directory with a plain file so every write fails
    fs::remove_dir_all(&cache_dir).unwrap();
    fs::write(&cache_dir, "not a directory").unwrap();

    let report = Scanner::new(options()).with_cache(cache).scan(dir.path()).unwrap();
    assert_eq!(report.total_files, 3);
    assert_eq!(report.duplicate_groups.len(), 1);
}

#[test]
fn test_parallel_scan_is_deterministic() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    for i in 0..25 {
        fs::write(dir.path().join(format!("docs/file{:02}.dat", i)), vec![(i % 3) as u8; 64]).unwrap();
    }

    let sequential = scan_uncached(dir.path());
    for _ in 0..3 {
        let parallel = Scanner::new(ScanOptions {
            use_cache: false,
            parallel: true,
            threads: Some(4),
            ..ScanOptions::default()
        })
        .scan(dir.path())
        .unwrap();
        assert_eq!(parallel.entries, sequential.entries);
        assert_eq!(parallel.duplicate_groups, sequential.duplicate_groups);
    }
}

#[test]
fn test_keep_strategy_is_deterministic() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    let report = scan_uncached(dir.path());

    for strategy in KeepStrategy::ALL {
        let first = plan(&report.duplicate_groups, strategy);
        for _ in 0..5 {
            let again = plan(&report.duplicate_groups, strategy);
            assert_eq!(again, first);
        }
    }

    let shortest = plan(&report.duplicate_groups, KeepStrategy::ShortestPath);
    assert_eq!(shortest[0].keep.path, report.root.join("backup/img1.jpg"));
}

#[test]
fn test_dry_run_plans_same_destinations_as_real_run() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    let target = dir.path().join("dupes");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("img1.jpg"), "occupied").unwrap();

    let report = scan_uncached(dir.path());
    let intents = plan(&report.duplicate_groups, KeepStrategy::First);
    let mode = ResolutionMode::Move {
        target_dir: target.clone(),
    };

    let dry = execute(
        &intents,
        &mode,
        &ExecuteOptions {
            dry_run: true,
            ..ExecuteOptions::default()
        },
        None,
    )
    .unwrap();
    assert_eq!(dry.simulated_count(), 2);
    assert!(report.root.join("photos/img1.jpg").exists());
    assert!(report.root.join("photos/img2.jpg").exists());

    let mut log = OperationLog::in_memory();
    let real = execute(&intents, &mode, &ExecuteOptions::default(), Some(&mut log)).unwrap();
    assert_eq!(real.completed_count(), 2);

    assert_eq!(dry.planned_destinations(), real.planned_destinations());
    let names: BTreeSet<PathBuf> = real.planned_destinations().into_iter().collect();
    let expected: BTreeSet<PathBuf> = [target.join("img1_1.jpg"), target.join("img2.jpg")]
        .into_iter()
        .collect();
    assert_eq!(names, expected);
}

#[test]
fn test_move_then_undo_restores_tree() {
    let dir = tempdir().unwrap();
    create_abc(dir.path());
    let target = dir.path().join("dupes");

    let report = scan_uncached(dir.path());
    let intents = plan(&report.duplicate_groups, KeepStrategy::Newest);
    let log_path = dir.path().join("state/operations.json");
    let mut log = OperationLog::open(&log_path).unwrap();

    let result = execute(
        &intents,
        &ResolutionMode::Move {
            target_dir: target.clone(),
        },
        &ExecuteOptions::default(),
        Some(&mut log),
    )
    .unwrap();
    let record = &result.records[0];
    assert_eq!(record.status, OperationStatus::Completed);
    let id = record.operation_id.unwrap();
    let original = report.root.join("a.txt");
    assert!(!original.exists());
    assert!(target.join("a.txt").exists());

    // undo through a freshly opened log, as a later invocation would
    let mut log = OperationLog::open(&log_path).unwrap();
    log.undo(id).unwrap();
    assert_eq!(fs::read_to_string(&original).unwrap(), "X");
    assert!(!target.join("a.txt").exists());
    assert!(log.lookup(id).unwrap().undone);

    let err = log.undo(id).unwrap_err();
    assert!(matches!(err, Error::AlreadyUndone(_)));
    assert!(OperationLog::open(&log_path).unwrap().lookup(id).unwrap().undone);
}

#[test]
fn test_quick_mode_groups_and_verifies() {
    let dir = tempdir().unwrap();
    // same size, same head and tail, different middle
    let mut left = vec![0u8; 8192];
    let mut right = left.clone();
    left[4096] = 1;
    right[4096] = 2;
    fs::write(dir.path().join("left.bin"), &left).unwrap();
    fs::write(dir.path().join("right.bin"), &right).unwrap();

    let report = Scanner::new(ScanOptions {
        use_cache: false,
        hasher: Hasher::new(HashAlgorithm::Sha256, HashMode::Quick).with_quick_window(1024),
        ..options()
    })
    .scan(dir.path())
    .unwrap();
    assert_eq!(report.duplicate_groups.len(), 1);

    let intents = plan(&report.duplicate_groups, KeepStrategy::First);
    let result = execute(&intents, &ResolutionMode::Remove, &ExecuteOptions::default(), None).unwrap();
    assert_eq!(result.records[0].status, OperationStatus::Skipped);
    assert!(dir.path().join("right.bin").exists());
}
