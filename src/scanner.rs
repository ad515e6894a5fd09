use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, trace, warn};

use crate::cache::{relative_key, CacheEntry, ScanCache};
use crate::error::{Error, Result};
use crate::hasher::{Fingerprint, Fingerprinter, Hasher};
use crate::walker::{default_exclude_dirs, Walker};
use crate::{FileEntry, ScanIssue, ScanReport};

/// Supplies an alternate "content date" for a file (EXIF capture time, PDF
/// creation date, ...). Returning `None` leaves the slot empty.
pub trait ContentDateProvider: Send + Sync {
    fn content_date(&self, path: &Path) -> Option<DateTime<Utc>>;
}

/// Configuration for one scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub include_hidden: bool,
    pub use_cache: bool,
    pub hasher: Hasher,
    /// Hash cache misses on a worker pool instead of the calling thread.
    pub parallel: bool,
    /// Worker count for parallel hashing; `None` uses the host's parallelism.
    pub threads: Option<usize>,
    pub exclude_dirs: BTreeSet<String>,
    pub show_progress: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_hidden: false,
            use_cache: true,
            hasher: Hasher::default(),
            parallel: true,
            threads: None,
            exclude_dirs: default_exclude_dirs(),
            show_progress: false,
        }
    }
}

/// Walks a tree, reuses cached fingerprints where files are unchanged, hashes
/// the rest and assembles a [`ScanReport`].
pub struct Scanner {
    options: ScanOptions,
    cache: Option<ScanCache>,
    date_provider: Option<Box<dyn ContentDateProvider>>,
    fingerprinter: Option<Box<dyn Fingerprinter>>,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self {
            options,
            cache: None,
            date_provider: None,
            fingerprinter: None,
        }
    }

    pub fn with_cache(mut self, cache: ScanCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_date_provider(mut self, provider: Box<dyn ContentDateProvider>) -> Self {
        self.date_provider = Some(provider);
        self
    }

    /// Hash cache misses with `fingerprinter` instead of `options.hasher`.
    pub fn with_fingerprinter(mut self, fingerprinter: Box<dyn Fingerprinter>) -> Self {
        self.fingerprinter = Some(fingerprinter);
        self
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ScanOptions {
        &mut self.options
    }

    /// Scan `root`. Only an unusable root fails; every per-file problem ends
    /// up in [`ScanReport::errors`].
    pub fn scan(&mut self, root: &Path) -> Result<ScanReport> {
        let start = Instant::now();
        let root = resolve_root(root)?;
        let use_cache = self.options.use_cache && self.cache.is_some();
        info!(
            "Starting scan of {} (cache={}, mode={}, parallel={})",
            root.display(),
            use_cache,
            self.options.hasher.mode,
            self.options.parallel
        );

        let mut report = ScanReport::new(&root);
        let scanned_at = Utc::now();

        // Phase 1: discover files and consult the cache
        let walker = Walker::new(self.options.exclude_dirs.clone(), self.options.include_hidden);
        let mut entries: Vec<FileEntry> = Vec::new();
        let mut pending: Vec<usize> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut walk_complete = true;

        for item in walker.walk(&root) {
            let path = match item {
                Ok(path) => path,
                Err(issue) => {
                    walk_complete = false;
                    report.add_issue(issue);
                    continue;
                }
            };
            seen.insert(relative_key(&root, &path));

            let mut entry = match stat_entry(&path) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Could not access {}: {}", path.display(), e);
                    report.add_issue(ScanIssue::from_error(&path, &e));
                    continue;
                }
            };

            if entry.size == 0 {
                entries.push(entry);
                continue;
            }

            if use_cache {
                if let Some(hit) = self.cached_fingerprint(&root, &entry, scanned_at) {
                    entry.fingerprint = Some(hit.fingerprint);
                    entry.fingerprint_kind = hit.fingerprint_kind;
                    report.cache_hits += 1;
                    entries.push(entry);
                    continue;
                }
                report.cache_misses += 1;
            }

            pending.push(entries.len());
            entries.push(entry);
        }

        debug!(
            "Found {} files ({} from cache, {} to hash)",
            entries.len(),
            report.cache_hits,
            pending.len()
        );

        // Phase 2: hash the misses
        if !pending.is_empty() {
            info!("Hashing {} files...", pending.len());
            let jobs: Vec<(PathBuf, u64)> = pending
                .iter()
                .map(|&i| (entries[i].path.clone(), entries[i].size))
                .collect();
            let results = self.hash_files(&jobs);

            // Phase 3: annotate entries and update the cache from this thread only
            for (&index, result) in pending.iter().zip(results) {
                let entry = &mut entries[index];
                match result {
                    Ok(fingerprint) => {
                        if use_cache {
                            if let Some(cache) = self.cache.as_mut() {
                                cache.update(
                                    &root,
                                    &relative_key(&root, &entry.path),
                                    CacheEntry {
                                        fingerprint: fingerprint.digest.clone(),
                                        fingerprint_kind: fingerprint.kind,
                                        algorithm: self.options.hasher.algorithm,
                                        size: entry.size,
                                        modified: entry.modified,
                                        last_scanned: scanned_at,
                                    },
                                );
                            }
                        }
                        entry.fingerprint = Some(fingerprint.digest);
                        entry.fingerprint_kind = fingerprint.kind;
                    }
                    Err(e) => {
                        warn!("Failed to hash {}: {}", entry.path.display(), e);
                        report.add_issue(ScanIssue::from_error(&entry.path, &e));
                    }
                }
            }
        }

        if let Some(provider) = &self.date_provider {
            for entry in entries.iter_mut() {
                entry.content_date = provider.content_date(&entry.path);
            }
        }

        // Phase 4: assemble the report in discovery order
        for entry in entries {
            report.add_entry(entry);
        }
        report.group_duplicates();
        report.duration_ms = start.elapsed().as_millis() as u64;

        if use_cache {
            if let Some(cache) = self.cache.as_mut() {
                // entries under an unreadable directory may still exist
                if walk_complete {
                    cache.retain_entries(&root, &seen);
                }
                cache.set(&root, &report);
            }
        }

        info!(
            "Scan complete in {:.2}s: {} files, {} duplicate groups",
            start.elapsed().as_secs_f64(),
            report.total_files,
            report.duplicate_groups.len()
        );
        if !report.errors.is_empty() {
            warn!("Encountered {} errors during scan", report.errors.len());
        }

        Ok(report)
    }

    /// Walk and stat `root` without hashing or touching the cache. Entries
    /// carry no fingerprints and no duplicate groups are built.
    pub fn inventory(&self, root: &Path) -> Result<ScanReport> {
        let start = Instant::now();
        let root = resolve_root(root)?;
        let walker = Walker::new(self.options.exclude_dirs.clone(), self.options.include_hidden);
        let mut report = ScanReport::new(&root);

        for item in walker.walk(&root) {
            let path = match item {
                Ok(path) => path,
                Err(issue) => {
                    report.add_issue(issue);
                    continue;
                }
            };
            match stat_entry(&path) {
                Ok(mut entry) => {
                    if let Some(provider) = &self.date_provider {
                        entry.content_date = provider.content_date(&entry.path);
                    }
                    report.add_entry(entry);
                }
                Err(e) => {
                    warn!("Could not access {}: {}", path.display(), e);
                    report.add_issue(ScanIssue::from_error(&path, &e));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        debug!("Inventoried {} files under {}", report.total_files, root.display());
        Ok(report)
    }

    /// Cached fingerprint of `entry` if it is still usable; a hit is stamped
    /// with `scanned_at`.
    fn cached_fingerprint(
        &mut self,
        root: &Path,
        entry: &FileEntry,
        scanned_at: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        let hasher = self.options.hasher;
        let cache = self.cache.as_mut()?;
        let key = relative_key(root, &entry.path);
        let cached = cache.get_entry(root, &key)?;

        if !cached.is_valid(entry.modified) {
            trace!("{} modified since last scan", key);
            return None;
        }
        if cached.algorithm != hasher.algorithm
            || cached.fingerprint_kind != hasher.kind_for(entry.size)
        {
            trace!("{} cached with a different hashing strategy", key);
            return None;
        }
        cache.touch(root, &key, scanned_at);
        Some(cached)
    }

    /// Results come back in the order of `jobs`, whatever order workers finish in.
    fn hash_files(&self, jobs: &[(PathBuf, u64)]) -> Vec<Result<Fingerprint>> {
        let hasher: &dyn Fingerprinter = match &self.fingerprinter {
            Some(custom) => custom.as_ref(),
            None => &self.options.hasher,
        };
        let progress = self.progress_bar(jobs.len());

        let results = if self.options.parallel {
            let run = || {
                jobs.par_iter()
                    .map(|(path, size)| {
                        let result = hasher.fingerprint_sized(path, *size);
                        progress.inc(1);
                        result
                    })
                    .collect::<Vec<_>>()
            };
            match self.options.threads {
                Some(threads) => match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
                    Ok(pool) => pool.install(run),
                    Err(e) => {
                        warn!("Could not build a {}-thread pool ({}); using the global pool", threads, e);
                        run()
                    }
                },
                None => run(),
            }
        } else {
            jobs.iter()
                .map(|(path, size)| {
                    let result = hasher.fingerprint_sized(path, *size);
                    progress.inc(1);
                    result
                })
                .collect()
        };

        progress.finish_and_clear();
        results
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            progress.set_style(style.progress_chars("##-"));
        }
        progress
    }
}

fn resolve_root(root: &Path) -> Result<PathBuf> {
    let resolved = fs::canonicalize(root).map_err(|e| Error::io(root, e))?;
    if !resolved.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "{} is not a directory",
            root.display()
        )));
    }
    Ok(resolved)
}

fn stat_entry(path: &Path) -> Result<FileEntry> {
    let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    FileEntry::from_metadata(path, &metadata).map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::{HashAlgorithm, HashMode};
    use crate::FingerprintKind;
    use tempfile::tempdir;

    fn options(parallel: bool) -> ScanOptions {
        ScanOptions {
            parallel,
            ..ScanOptions::default()
        }
    }

    #[test]
    fn test_scan_groups_duplicates() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "X").unwrap();
        fs::write(dir.path().join("b.txt"), "X").unwrap();
        fs::write(dir.path().join("c.txt"), "Y").unwrap();

        let report = Scanner::new(options(false)).scan(dir.path()).unwrap();
        assert_eq!(report.total_files, 3);
        assert_eq!(report.total_size, 3);
        assert_eq!(report.duplicate_groups.len(), 1);
        let group = report.duplicate_groups.values().next().unwrap();
        let names: Vec<_> = group.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(report.cache_hits + report.cache_misses, 0);
    }

    #[test]
    fn test_empty_files_never_group() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("e1"), "").unwrap();
        fs::write(dir.path().join("e2"), "").unwrap();

        let report = Scanner::new(options(false)).scan(dir.path()).unwrap();
        assert_eq!(report.total_files, 2);
        assert!(report.duplicate_groups.is_empty());
        assert!(report
            .entries
            .iter()
            .all(|e| e.fingerprint.is_none() && e.fingerprint_kind == FingerprintKind::None));
    }

    #[test]
    fn test_parallel_matches_sequential_order() {
        let dir = tempdir().unwrap();
        for i in 0..40 {
            fs::write(dir.path().join(format!("f{:02}.bin", i)), vec![i as u8 % 5; 100 + i]).unwrap();
        }

        let sequential = Scanner::new(options(false)).scan(dir.path()).unwrap();
        let parallel = Scanner::new(ScanOptions {
            threads: Some(4),
            ..options(true)
        })
        .scan(dir.path())
        .unwrap();

        assert_eq!(sequential.entries, parallel.entries);
        assert_eq!(sequential.duplicate_groups, parallel.duplicate_groups);
    }

    #[test]
    fn test_inventory_skips_hashing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "X").unwrap();
        fs::write(dir.path().join("b.txt"), "X").unwrap();

        let report = Scanner::new(options(false)).inventory(dir.path()).unwrap();
        assert_eq!(report.total_files, 2);
        assert!(report.entries.iter().all(|e| e.fingerprint.is_none()));
        assert!(report.duplicate_groups.is_empty());
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        let mut scanner = Scanner::new(ScanOptions::default());
        assert_eq!(
            scanner.scan(&file).unwrap_err().kind(),
            crate::ErrorKind::InvalidArgument
        );
        assert_eq!(
            scanner.scan(&dir.path().join("missing")).unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_content_date_provider_fills_slot() {
        struct Fixed(DateTime<Utc>);
        impl ContentDateProvider for Fixed {
            fn content_date(&self, path: &Path) -> Option<DateTime<Utc>> {
                path.extension().filter(|e| *e == "jpg").map(|_| self.0)
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("photo.jpg"), "img").unwrap();
        fs::write(dir.path().join("notes.txt"), "txt").unwrap();

        let date = DateTime::parse_from_rfc3339("2020-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let report = Scanner::new(options(false))
            .with_date_provider(Box::new(Fixed(date)))
            .scan(dir.path())
            .unwrap();

        let photo = report.entries.iter().find(|e| e.name == "photo.jpg").unwrap();
        let notes = report.entries.iter().find(|e| e.name == "notes.txt").unwrap();
        assert_eq!(photo.content_date, Some(date));
        assert_eq!(photo.effective_date(), date);
        assert_eq!(notes.content_date, None);
    }

    #[test]
    fn test_cache_miss_on_strategy_change() {
        let dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "content").unwrap();

        let mut scanner = Scanner::new(options(false))
            .with_cache(ScanCache::open(cache_dir.path()).unwrap());
        let first = scanner.scan(dir.path()).unwrap();
        assert_eq!(first.cache_misses, 1);

        let second = scanner.scan(dir.path()).unwrap();
        assert_eq!(second.cache_hits, 1);

        scanner.options_mut().hasher = Hasher::new(HashAlgorithm::Md5, HashMode::Full);
        let third = scanner.scan(dir.path()).unwrap();
        assert_eq!(third.cache_hits, 0);
        assert_eq!(third.cache_misses, 1);
    }

    struct FailOn {
        name: &'static str,
        inner: Hasher,
    }

    impl Fingerprinter for FailOn {
        fn fingerprint_sized(&self, path: &Path, size: u64) -> Result<Fingerprint> {
            if path.file_name().is_some_and(|n| n == self.name) {
                let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
                return Err(Error::io(path, denied));
            }
            self.inner.fingerprint_sized(path, size)
        }
    }

    #[test]
    fn test_hash_failure_is_recorded_and_scan_continues() {
        let dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt", "locked.txt", "other.txt"] {
            let content = if name == "other.txt" { "Y" } else { "X" };
            fs::write(dir.path().join(name), content).unwrap();
        }

        let mut scanner = Scanner::new(options(true))
            .with_cache(ScanCache::open(cache_dir.path()).unwrap())
            .with_fingerprinter(Box::new(FailOn {
                name: "locked.txt",
                inner: Hasher::default(),
            }));
        let report = scanner.scan(dir.path()).unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, crate::ErrorKind::AccessDenied);
        assert!(report.errors[0].path.ends_with("locked.txt"));
        assert_eq!(report.total_files, 5);
        assert_eq!(report.duplicate_groups.len(), 1);
        let names: Vec<&str> = report
            .duplicate_groups
            .values()
            .next()
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
        let locked = report.entries.iter().find(|e| e.name == "locked.txt").unwrap();
        assert!(locked.fingerprint.is_none());

        let again = scanner.scan(dir.path()).unwrap();
        assert_eq!(again.cache_hits, 4);
        assert_eq!(again.cache_misses, 1);
        assert_eq!(again.errors.len(), 1);
    }

    #[test]
    fn test_rescan_drops_cache_entries_of_removed_files() {
        let dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        fs::write(dir.path().join("b.txt"), "B").unwrap();
        let root = dir.path().canonicalize().unwrap();

        let mut scanner = Scanner::new(options(false))
            .with_cache(ScanCache::open(cache_dir.path()).unwrap());
        scanner.scan(dir.path()).unwrap();
        assert_eq!(ScanCache::open(cache_dir.path()).unwrap().entry_count(&root), 2);

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let report = scanner.scan(dir.path()).unwrap();
        assert_eq!(report.total_files, 1);

        let mut reopened = ScanCache::open(cache_dir.path()).unwrap();
        assert_eq!(reopened.entry_count(&root), 1);
        assert!(reopened.get_entry(&root, "a.txt").is_none());
    }
}
