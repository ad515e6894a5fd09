use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::hasher::HashAlgorithm;
use crate::{FingerprintKind, ScanReport};

/// Layout version of cache documents. Documents with another version are ignored.
pub const CACHE_VERSION: u32 = 1;

/// Largest mtime drift, in microseconds, that still counts as "unchanged".
/// Absorbs filesystems that truncate timestamps to whole seconds.
pub const MTIME_TOLERANCE_MICROS: i64 = 1_000_000;

/// Persisted fact about one file under one root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub fingerprint_kind: FingerprintKind,
    pub algorithm: HashAlgorithm,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub last_scanned: DateTime<Utc>,
}

impl CacheEntry {
    /// True when `current_modified` is within the tolerance of the stored mtime.
    pub fn is_valid(&self, current_modified: DateTime<Utc>) -> bool {
        (current_modified - self.modified)
            .num_microseconds()
            .map(|drift| drift.abs() < MTIME_TOLERANCE_MICROS)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    root: PathBuf,
    updated_at: DateTime<Utc>,
    report: Option<ScanReport>,
    files: BTreeMap<String, CacheEntry>,
}

impl CacheDocument {
    fn empty(root: &Path) -> Self {
        Self {
            version: CACHE_VERSION,
            root: root.to_path_buf(),
            updated_at: Utc::now(),
            report: None,
            files: BTreeMap::new(),
        }
    }
}

/// Key for `path` inside `root`: the relative path with `/` separators.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// File-backed scan cache, one JSON document per scanned root.
///
/// Unreadable or unparsable documents behave as empty ones, and failed writes
/// are logged and dropped: the cache only ever saves work.
#[derive(Debug)]
pub struct ScanCache {
    dir: PathBuf,
    documents: HashMap<PathBuf, CacheDocument>,
    dirty: BTreeSet<PathBuf>,
}

impl ScanCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        debug!("Using '{}' for scan cache", dir.display());
        Ok(Self {
            dir,
            documents: HashMap::new(),
            dirty: BTreeSet::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, root: &Path) -> PathBuf {
        let key = blake3::hash(root.to_string_lossy().as_bytes()).to_hex();
        self.dir.join(format!("scan_{}.json", &key[..32]))
    }

    fn document(&mut self, root: &Path) -> &mut CacheDocument {
        let path = self.document_path(root);
        self.documents
            .entry(root.to_path_buf())
            .or_insert_with(|| read_document(&path, root))
    }

    /// The last full report stored for `root`, verbatim.
    pub fn get(&mut self, root: &Path) -> Option<ScanReport> {
        self.document(root).report.clone()
    }

    /// Store `report` as the latest report for `root` and persist immediately.
    pub fn set(&mut self, root: &Path, report: &ScanReport) {
        let doc = self.document(root);
        doc.report = Some(report.clone());
        doc.updated_at = Utc::now();
        self.dirty.insert(root.to_path_buf());
        self.flush();
    }

    pub fn get_entry(&mut self, root: &Path, relative: &str) -> Option<CacheEntry> {
        self.document(root).files.get(relative).cloned()
    }

    /// Record a freshly computed fingerprint. Persisted on the next [`ScanCache::flush`].
    pub fn update(&mut self, root: &Path, relative: &str, entry: CacheEntry) {
        trace!("Caching fingerprint for {}", relative);
        let doc = self.document(root);
        doc.files.insert(relative.to_string(), entry);
        doc.updated_at = Utc::now();
        self.dirty.insert(root.to_path_buf());
    }

    /// Note that `relative` was seen unchanged at `at`.
    pub fn touch(&mut self, root: &Path, relative: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.document(root).files.get_mut(relative) {
            entry.last_scanned = at;
            self.dirty.insert(root.to_path_buf());
        }
    }

    /// Drop the entries of `root` whose key is not in `seen`. Returns how
    /// many were dropped.
    pub fn retain_entries(&mut self, root: &Path, seen: &BTreeSet<String>) -> usize {
        let doc = self.document(root);
        let before = doc.files.len();
        doc.files.retain(|key, _| seen.contains(key));
        let removed = before - doc.files.len();
        if removed > 0 {
            debug!("Dropped {} stale cache entries under {}", removed, root.display());
            doc.updated_at = Utc::now();
            self.dirty.insert(root.to_path_buf());
        }
        removed
    }

    /// Drop entries, in every cache document, last seen longer than `max_age`
    /// ago. Returns how many were dropped.
    pub fn prune_older_than(&mut self, max_age: chrono::Duration) -> usize {
        self.flush();
        self.documents.clear();
        let cutoff = Utc::now() - max_age;

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read cache directory {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with("scan_") && name.ends_with(".json")) {
                continue;
            }
            let mut doc = match fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<CacheDocument>(&text).ok())
            {
                Some(doc) if doc.version == CACHE_VERSION => doc,
                _ => {
                    debug!("Skipping unusable cache document {}", path.display());
                    continue;
                }
            };

            let before = doc.files.len();
            doc.files.retain(|_, e| e.last_scanned >= cutoff);
            let dropped = before - doc.files.len();
            if dropped > 0 {
                doc.updated_at = Utc::now();
                if let Err(e) = write_document(&path, &doc) {
                    warn!("Could not write scan cache {}: {}", path.display(), e);
                    continue;
                }
                removed += dropped;
            }
        }
        info!("Pruned {} cache entries older than {} days", removed, max_age.num_days());
        removed
    }

    pub fn entry_count(&mut self, root: &Path) -> usize {
        self.document(root).files.len()
    }

    /// Write every modified document. Failures are logged, never returned.
    pub fn flush(&mut self) {
        let dirty = std::mem::take(&mut self.dirty);
        for root in dirty {
            let path = self.document_path(&root);
            if let Some(doc) = self.documents.get(&root) {
                if let Err(e) = write_document(&path, doc) {
                    warn!("Could not write scan cache for {}: {}", root.display(), e);
                }
            }
        }
    }

    /// Drop everything cached for `root`.
    pub fn invalidate(&mut self, root: &Path) {
        self.documents.remove(root);
        self.dirty.remove(root);
        let path = self.document_path(root);
        match fs::remove_file(&path) {
            Ok(()) => info!("Invalidated scan cache for {}", root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }

    /// Remove every cache document in the cache directory. Returns how many were removed.
    pub fn clear_all(&mut self) -> usize {
        self.documents.clear();
        self.dirty.clear();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read cache directory {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("scan_") && name.ends_with(".json") {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Could not remove {}: {}", entry.path().display(), e),
                }
            }
        }
        info!("Scan cache cleared ({} documents)", removed);
        removed
    }
}

fn read_document(path: &Path, root: &Path) -> CacheDocument {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return CacheDocument::empty(root),
        Err(e) => {
            warn!("Could not read scan cache {}: {}", path.display(), e);
            return CacheDocument::empty(root);
        }
    };

    match serde_json::from_str::<CacheDocument>(&text) {
        Ok(doc) if doc.version != CACHE_VERSION => {
            warn!(
                "Ignoring scan cache {} with version {} (expected {})",
                path.display(),
                doc.version,
                CACHE_VERSION
            );
            CacheDocument::empty(root)
        }
        Ok(doc) if doc.root != root => {
            debug!("Scan cache {} belongs to another root", path.display());
            CacheDocument::empty(root)
        }
        Ok(doc) => doc,
        Err(e) => {
            let err = Error::CacheCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            };
            warn!("{}; treating as empty", err);
            CacheDocument::empty(root)
        }
    }
}

fn write_document(path: &Path, doc: &CacheDocument) -> Result<()> {
    let json = serde_json::to_string(doc).map_err(|e| Error::CacheCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    crate::utils::write_atomic(path, json.as_bytes())
}
