use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use console::style;
use humansize::{format_size, DECIMAL};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::{FileEntry, FingerprintKind, ScanReport};

/// Which member of a duplicate group survives resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepStrategy {
    /// Latest modification time
    #[default]
    Newest,
    /// Earliest modification time
    Oldest,
    /// Fewest characters in the path
    ShortestPath,
    /// First member in discovery order
    First,
}

impl KeepStrategy {
    pub const ALL: [KeepStrategy; 4] = [
        KeepStrategy::Newest,
        KeepStrategy::Oldest,
        KeepStrategy::ShortestPath,
        KeepStrategy::First,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeepStrategy::Newest => "newest",
            KeepStrategy::Oldest => "oldest",
            KeepStrategy::ShortestPath => "shortest_path",
            KeepStrategy::First => "first",
        }
    }

    /// Order `files` so the survivor comes first. The sort is stable, so ties
    /// keep discovery order.
    pub fn rank<'a>(&self, files: &'a [FileEntry]) -> Vec<&'a FileEntry> {
        let mut ranked: Vec<&FileEntry> = files.iter().collect();
        match self {
            KeepStrategy::Newest => ranked.sort_by(|a, b| b.modified.cmp(&a.modified)),
            KeepStrategy::Oldest => ranked.sort_by(|a, b| a.modified.cmp(&b.modified)),
            KeepStrategy::ShortestPath => ranked.sort_by_key(|e| path_length(e)),
            KeepStrategy::First => {}
        }
        ranked
    }
}

fn path_length(entry: &FileEntry) -> usize {
    entry.path.to_string_lossy().chars().count()
}

impl fmt::Display for KeepStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeepStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeepStrategy::ALL
            .into_iter()
            .find(|k| k.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown keep strategy '{}' (expected newest, oldest, shortest_path or first)",
                    s
                ))
            })
    }
}

/// A planned, not yet executed, removal of `target` in favour of `keep`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateIntent {
    pub fingerprint: String,
    /// Quick when either side carries a quick fingerprint.
    pub kind: FingerprintKind,
    pub keep: FileEntry,
    pub target: FileEntry,
}

impl DuplicateIntent {
    pub fn needs_verification(&self) -> bool {
        self.kind == FingerprintKind::Quick
    }
}

/// Turn duplicate groups into intents: one survivor per group, every other
/// member becomes an intent, in ranked order.
pub fn plan(
    duplicate_groups: &BTreeMap<String, Vec<FileEntry>>,
    strategy: KeepStrategy,
) -> Vec<DuplicateIntent> {
    let mut intents = Vec::new();

    for (fingerprint, files) in duplicate_groups {
        if files.len() < 2 {
            continue;
        }
        let ranked = strategy.rank(files);
        let keep = ranked[0];
        debug!("Group {}: keeping {}", short_digest(fingerprint), keep.path.display());

        for target in &ranked[1..] {
            let kind = if keep.fingerprint_kind == FingerprintKind::Quick
                || target.fingerprint_kind == FingerprintKind::Quick
            {
                FingerprintKind::Quick
            } else {
                FingerprintKind::Full
            };
            intents.push(DuplicateIntent {
                fingerprint: fingerprint.clone(),
                kind,
                keep: keep.clone(),
                target: (*target).clone(),
            });
        }
    }

    intents
}

pub fn short_digest(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

/// Analyze the scan results and provide recommendations
pub fn analyze_duplicates(report: &ScanReport) -> DedupAnalysis {
    let mut analysis = DedupAnalysis::new();

    for files in report.duplicate_groups.values() {
        if files.len() < 2 {
            continue;
        }
        let file_size = files[0].size;
        let duplicate_count = files.len() - 1;
        let group_waste = file_size * duplicate_count as u64;

        analysis.total_groups += 1;
        analysis.total_duplicates += duplicate_count;
        analysis.total_wasted_space += group_waste;

        match file_size {
            0..=1024 => analysis.small_files += duplicate_count,
            1025..=1_048_576 => analysis.medium_files += duplicate_count,
            _ => analysis.large_files += duplicate_count,
        }

        if files.iter().any(|f| f.fingerprint_kind == FingerprintKind::Quick) {
            analysis.quick_groups += 1;
        }

        if group_waste > analysis.largest_waste.1 {
            analysis.largest_waste = (files[0].path.clone(), group_waste);
        }
    }

    analysis
}

/// Analysis results for duplicate files
#[derive(Debug, Clone, PartialEq)]
pub struct DedupAnalysis {
    pub total_groups: usize,
    pub total_duplicates: usize,
    pub total_wasted_space: u64,
    pub small_files: usize,  // <= 1KB
    pub medium_files: usize, // 1KB - 1MB
    pub large_files: usize,  // > 1MB
    /// Groups matched on a quick fingerprint only
    pub quick_groups: usize,
    pub largest_waste: (PathBuf, u64),
}

impl DedupAnalysis {
    pub fn new() -> Self {
        Self {
            total_groups: 0,
            total_duplicates: 0,
            total_wasted_space: 0,
            small_files: 0,
            medium_files: 0,
            large_files: 0,
            quick_groups: 0,
            largest_waste: (PathBuf::new(), 0),
        }
    }

    pub fn print_analysis(&self) {
        println!();
        println!("{}", style("🔍 Duplicate Analysis").cyan().bold());
        println!("{}", style("=".repeat(30)).cyan());

        println!("Duplicate groups found: {}", self.total_groups);
        println!("Redundant files: {}", self.total_duplicates);
        println!("Wasted space: {}", format_size(self.total_wasted_space, DECIMAL));

        println!();
        println!("{}", style("📊 File Size Distribution:").bold());
        println!("  Small files (≤1KB): {}", self.small_files);
        println!("  Medium files (1KB-1MB): {}", self.medium_files);
        println!("  Large files (>1MB): {}", self.large_files);

        if self.largest_waste.1 > 0 {
            println!();
            println!("{}", style("🎯 Largest opportunity:").bold());
            println!("  File: {}", self.largest_waste.0.display());
            println!("  Potential savings: {}", format_size(self.largest_waste.1, DECIMAL));
        }

        println!();
        println!("{}", style("💡 Recommendations:").green().bold());

        if self.large_files > 0 {
            println!("  • Focus on large files first for maximum space savings");
        }

        if self.quick_groups > 0 {
            println!(
                "  • {} groups matched on a quick fingerprint; keep verification enabled",
                self.quick_groups
            );
        }

        if self.total_wasted_space > 1_000_000_000 {
            println!("  • Significant space savings possible (>1GB)");
        }

        println!("  • Always use --dry-run first to preview changes");
        println!("  • Use 'move' mode or a backup directory to keep removals undoable");
    }
}

impl Default for DedupAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn entry(path: &str, modified: DateTime<Utc>) -> FileEntry {
        FileEntry {
            path: PathBuf::from(path),
            name: path.rsplit('/').next().unwrap().to_string(),
            extension: "txt".to_string(),
            size: 10,
            modified,
            fingerprint: Some("f".repeat(64)),
            fingerprint_kind: FingerprintKind::Full,
            content_date: None,
        }
    }

    fn group(files: Vec<FileEntry>) -> BTreeMap<String, Vec<FileEntry>> {
        let mut groups = BTreeMap::new();
        groups.insert("f".repeat(64), files);
        groups
    }

    fn survivors(groups: &BTreeMap<String, Vec<FileEntry>>, strategy: KeepStrategy) -> Vec<PathBuf> {
        plan(groups, strategy)
            .into_iter()
            .map(|i| i.keep.path)
            .collect()
    }

    #[test]
    fn test_keep_strategies() {
        let t0 = Utc::now();
        let groups = group(vec![
            entry("/r/long/path/a.txt", t0),
            entry("/r/b.txt", t0 + Duration::seconds(10)),
            entry("/r/sub/c.txt", t0 - Duration::seconds(10)),
        ]);

        assert_eq!(survivors(&groups, KeepStrategy::Newest)[0], PathBuf::from("/r/b.txt"));
        assert_eq!(survivors(&groups, KeepStrategy::Oldest)[0], PathBuf::from("/r/sub/c.txt"));
        assert_eq!(survivors(&groups, KeepStrategy::ShortestPath)[0], PathBuf::from("/r/b.txt"));
        assert_eq!(survivors(&groups, KeepStrategy::First)[0], PathBuf::from("/r/long/path/a.txt"));
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let t = Utc::now();
        let groups = group(vec![entry("/r/x.txt", t), entry("/r/y.txt", t), entry("/r/z.txt", t)]);

        for strategy in KeepStrategy::ALL {
            let intents = plan(&groups, strategy);
            assert_eq!(intents.len(), 2);
            assert_eq!(intents[0].keep.path, PathBuf::from("/r/x.txt"));
            assert_eq!(intents[0].target.path, PathBuf::from("/r/y.txt"));
            assert_eq!(intents[1].target.path, PathBuf::from("/r/z.txt"));
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let t0 = Utc::now();
        let groups = group(vec![
            entry("/r/a.txt", t0),
            entry("/r/b.txt", t0 + Duration::seconds(1)),
        ]);
        let first = plan(&groups, KeepStrategy::Newest);
        for _ in 0..5 {
            assert_eq!(plan(&groups, KeepStrategy::Newest), first);
        }
    }

    #[test]
    fn test_quick_members_mark_intent() {
        let t = Utc::now();
        let mut quick = entry("/r/b.bin", t);
        quick.fingerprint_kind = FingerprintKind::Quick;
        let groups = group(vec![entry("/r/a.bin", t), quick]);

        let intents = plan(&groups, KeepStrategy::First);
        assert!(intents[0].needs_verification());
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("shortest_path".parse::<KeepStrategy>().unwrap(), KeepStrategy::ShortestPath);
        assert_eq!("NEWEST".parse::<KeepStrategy>().unwrap(), KeepStrategy::Newest);
        let err = "largest".parse::<KeepStrategy>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_analyze_duplicates() {
        let t = Utc::now();
        let mut report = ScanReport::new("/r");
        report.duplicate_groups = group(vec![entry("/r/a", t), entry("/r/b", t), entry("/r/c", t)]);

        let analysis = analyze_duplicates(&report);
        assert_eq!(analysis.total_groups, 1);
        assert_eq!(analysis.total_duplicates, 2);
        assert_eq!(analysis.total_wasted_space, 20);
        assert_eq!(analysis.small_files, 2);
        assert_eq!(analysis.largest_waste, (PathBuf::from("/r/a"), 20));
    }
}
