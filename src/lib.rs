pub mod actions;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod oplog;
pub mod organize;
pub mod scanner;
pub mod utils;
pub mod walker;

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use actions::{execute, execute_transfers, ActionResult, ExecuteOptions, ResolutionMode};
pub use cache::{CacheEntry, ScanCache};
pub use config::Config;
pub use dedup::{plan, DuplicateIntent, KeepStrategy};
pub use error::{Error, ErrorKind, Result};
pub use hasher::{Fingerprint, Fingerprinter, HashAlgorithm, HashMode, Hasher};
pub use oplog::{Operation, OperationKind, OperationLog, UndoOutcome, UndoStatus};
pub use scanner::{ScanOptions, Scanner};
pub use walker::Walker;

/// Extension recorded for files whose name has no suffix.
pub const NO_EXTENSION: &str = "(none)";

/// How much of a file's content backs its fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintKind {
    /// Digest over every byte of the file.
    Full,
    /// Digest over the size and the boundary windows only; not proof of equality.
    Quick,
    /// No fingerprint (empty file, or hashing failed).
    None,
}

/// One file observed during a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub fingerprint: Option<String>,
    pub fingerprint_kind: FingerprintKind,
    /// Date supplied by a content-date provider (EXIF capture date and the like).
    pub content_date: Option<DateTime<Utc>>,
}

impl FileEntry {
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> io::Result<Self> {
        let modified = metadata.modified()?;
        Ok(Self {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            extension: extension_of(path),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(modified),
            fingerprint: None,
            fingerprint_kind: FingerprintKind::None,
            content_date: None,
        })
    }

    /// The date organization rules should use: content date when known, else mtime.
    pub fn effective_date(&self) -> DateTime<Utc> {
        self.content_date.unwrap_or(self.modified)
    }
}

/// Lowercase extension without the dot, or [`NO_EXTENSION`].
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| NO_EXTENSION.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionStats {
    pub count: usize,
    pub bytes: u64,
}

/// A file that could not be walked, stat'ed or hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

impl ScanIssue {
    pub fn from_error(path: &Path, error: &Error) -> Self {
        Self {
            path: path.to_path_buf(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Results of scanning one directory tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub root: PathBuf,
    pub scanned_at: DateTime<Utc>,
    pub entries: Vec<FileEntry>,
    pub duplicate_groups: BTreeMap<String, Vec<FileEntry>>,
    pub by_extension: BTreeMap<String, ExtensionStats>,
    pub total_files: usize,
    pub total_size: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub errors: Vec<ScanIssue>,
    pub duration_ms: u64,
}

/// Flat, serializable view of a report for front-ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub root: PathBuf,
    pub total_files: usize,
    pub total_size: u64,
    pub duplicate_groups: usize,
    pub duplicate_files: usize,
    pub wasted_space: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub errors: usize,
}

impl ScanReport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scanned_at: Utc::now(),
            entries: Vec::new(),
            duplicate_groups: BTreeMap::new(),
            by_extension: BTreeMap::new(),
            total_files: 0,
            total_size: 0,
            cache_hits: 0,
            cache_misses: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn add_entry(&mut self, entry: FileEntry) {
        self.total_files += 1;
        self.total_size += entry.size;

        let stats = self.by_extension.entry(entry.extension.clone()).or_default();
        stats.count += 1;
        stats.bytes += entry.size;

        self.entries.push(entry);
    }

    pub fn add_issue(&mut self, issue: ScanIssue) {
        self.errors.push(issue);
    }

    /// Rebuild `duplicate_groups` from `entries`. Empty files never take part.
    pub fn group_duplicates(&mut self) {
        let mut by_fingerprint: BTreeMap<String, Vec<FileEntry>> = BTreeMap::new();
        for entry in &self.entries {
            if entry.size == 0 {
                continue;
            }
            if let Some(fingerprint) = &entry.fingerprint {
                by_fingerprint
                    .entry(fingerprint.clone())
                    .or_default()
                    .push(entry.clone());
            }
        }
        by_fingerprint.retain(|_, files| files.len() > 1);
        self.duplicate_groups = by_fingerprint;
    }

    pub fn get_duplicate_count(&self) -> usize {
        self.duplicate_groups
            .values()
            .map(|files| files.len().saturating_sub(1))
            .sum()
    }

    pub fn get_wasted_space(&self) -> u64 {
        self.duplicate_groups
            .values()
            .map(|files| files[0].size * (files.len() as u64 - 1))
            .sum()
    }

    /// Up to `limit` extensions, largest total size first.
    pub fn top_extensions(&self, limit: usize) -> Vec<(&str, &ExtensionStats)> {
        let mut top: Vec<(&str, &ExtensionStats)> = self
            .by_extension
            .iter()
            .map(|(ext, stats)| (ext.as_str(), stats))
            .collect();
        top.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes).then(a.0.cmp(b.0)));
        top.truncate(limit);
        top
    }

    pub fn summary(&self) -> ScanSummary {
        ScanSummary {
            root: self.root.clone(),
            total_files: self.total_files,
            total_size: self.total_size,
            duplicate_groups: self.duplicate_groups.len(),
            duplicate_files: self.get_duplicate_count(),
            wasted_space: self.get_wasted_space(),
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            errors: self.errors.len(),
        }
    }
}
