use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use console::style;
use humansize::{format_size, DECIMAL};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dedup::DuplicateIntent;
use crate::error::{Error, Result};
use crate::hasher::{verify_identical, HashAlgorithm};
use crate::oplog::{OperationKind, OperationLog};
use crate::utils::{generate_unique_filename, move_file};

/// What happens to the non-surviving members of a duplicate group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionMode {
    Remove,
    Move { target_dir: PathBuf },
}

impl ResolutionMode {
    /// Build a mode from its CLI name. `move` requires a target directory.
    pub fn from_parts(name: &str, target_dir: Option<PathBuf>) -> Result<Self> {
        match (name.to_ascii_lowercase().as_str(), target_dir) {
            ("remove" | "delete", _) => Ok(ResolutionMode::Remove),
            ("move", Some(target_dir)) => Ok(ResolutionMode::Move { target_dir }),
            ("move", None) => Err(Error::InvalidArgument(
                "move mode requires a target directory".to_string(),
            )),
            (other, _) => Err(Error::InvalidArgument(format!(
                "unknown resolution mode '{}' (expected remove or move)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub dry_run: bool,
    /// Compare full content before acting on a quick-fingerprint match.
    pub verify_before_delete: bool,
    /// Move removed files here instead of deleting them outright.
    pub backup_dir: Option<PathBuf>,
    pub algorithm: HashAlgorithm,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            verify_before_delete: true,
            backup_dir: None,
            algorithm: HashAlgorithm::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Completed,
    Simulated,
    Failed,
    Skipped,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationStatus::Completed => "completed",
            OperationStatus::Simulated => "simulated",
            OperationStatus::Failed => "failed",
            OperationStatus::Skipped => "skipped",
        })
    }
}

/// Outcome of one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub source: PathBuf,
    /// Planned or actual destination. For deletes, where the backup went.
    pub destination: Option<PathBuf>,
    pub status: OperationStatus,
    pub error: Option<String>,
    pub bytes: u64,
    /// Id in the operation log, when the operation was executed and logged.
    pub operation_id: Option<u64>,
}

impl OperationRecord {
    fn new(kind: OperationKind, source: &Path, destination: Option<PathBuf>, bytes: u64) -> Self {
        Self {
            kind,
            source: source.to_path_buf(),
            destination,
            status: OperationStatus::Simulated,
            error: None,
            bytes,
            operation_id: None,
        }
    }

    fn failed(mut self, error: impl fmt::Display) -> Self {
        warn!("{} {} failed: {}", self.kind, self.source.display(), error);
        self.status = OperationStatus::Failed;
        self.error = Some(error.to_string());
        self
    }

    fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.status = OperationStatus::Skipped;
        self.error = Some(reason.into());
        self
    }

    fn completed(mut self, operation_id: Option<u64>) -> Self {
        self.status = OperationStatus::Completed;
        self.operation_id = operation_id;
        self
    }
}

/// Result of performing actions on files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub records: Vec<OperationRecord>,
    /// Log batch holding every completed operation of this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<u64>,
}

impl ActionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: OperationRecord) {
        self.records.push(record);
    }

    fn count(&self, status: OperationStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn completed_count(&self) -> usize {
        self.count(OperationStatus::Completed)
    }

    pub fn simulated_count(&self) -> usize {
        self.count(OperationStatus::Simulated)
    }

    pub fn failed_count(&self) -> usize {
        self.count(OperationStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(OperationStatus::Skipped)
    }

    /// Bytes freed (or that would be freed) from the scanned tree.
    pub fn bytes_affected(&self) -> u64 {
        self.records
            .iter()
            .filter(|r| matches!(r.status, OperationStatus::Completed | OperationStatus::Simulated))
            .map(|r| r.bytes)
            .sum()
    }

    /// Destinations in record order; identical between a dry run and a real
    /// run from the same starting state.
    pub fn planned_destinations(&self) -> Vec<PathBuf> {
        self.records
            .iter()
            .filter_map(|r| r.destination.clone())
            .collect()
    }

    pub fn print_summary(&self) {
        println!();
        println!("{}", style("📊 Action Summary").green().bold());
        println!("{}", style("-".repeat(20)).green());
        println!("Files processed: {}", self.records.len());
        if self.simulated_count() > 0 {
            println!("Simulated operations: {}", self.simulated_count());
        }
        println!("Successful operations: {}", self.completed_count());
        println!("Skipped operations: {}", self.skipped_count());
        println!("Failed operations: {}", self.failed_count());
        println!("Space affected: {}", format_size(self.bytes_affected(), DECIMAL));

        let problems: Vec<_> = self
            .records
            .iter()
            .filter(|r| matches!(r.status, OperationStatus::Failed | OperationStatus::Skipped))
            .collect();
        if !problems.is_empty() {
            println!();
            println!("{}", style("❌ Not processed:").red().bold());
            for record in problems {
                println!(
                    "  {} ({}): {}",
                    record.source.display(),
                    record.status,
                    record.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

/// Carry out duplicate intents. Per-file failures become `Failed` records;
/// only an unusable target or backup directory fails the whole call, and it
/// does so before anything is touched.
pub fn execute(
    intents: &[DuplicateIntent],
    mode: &ResolutionMode,
    options: &ExecuteOptions,
    mut log: Option<&mut OperationLog>,
) -> Result<ActionResult> {
    if let ResolutionMode::Move { target_dir } = mode {
        prepare_dir(target_dir, options.dry_run)?;
    }
    if let Some(backup_dir) = &options.backup_dir {
        prepare_dir(backup_dir, options.dry_run)?;
    }

    info!(
        "Resolving {} duplicates ({:?}{})",
        intents.len(),
        mode,
        if options.dry_run { ", dry run" } else { "" }
    );

    let mut result = ActionResult::new();
    let mut reserved: HashSet<PathBuf> = HashSet::new();
    if !options.dry_run {
        result.batch = log.as_deref_mut().map(OperationLog::begin_batch);
    }

    for intent in intents {
        let target = &intent.target;
        let kind = match mode {
            ResolutionMode::Remove => OperationKind::Delete,
            ResolutionMode::Move { .. } => OperationKind::Move,
        };

        if options.verify_before_delete && intent.needs_verification() {
            match verify_identical(&intent.keep.path, &target.path, options.algorithm) {
                Ok(true) => debug!("Verified {} against {}", target.path.display(), intent.keep.path.display()),
                Ok(false) => {
                    warn!(
                        "{} only shares a quick fingerprint with {}; leaving it alone",
                        target.path.display(),
                        intent.keep.path.display()
                    );
                    result.add_record(
                        OperationRecord::new(kind, &target.path, None, target.size)
                            .skipped("content differs from the kept file"),
                    );
                    continue;
                }
                Err(e) => {
                    result.add_record(
                        OperationRecord::new(kind, &target.path, None, target.size).failed(e),
                    );
                    continue;
                }
            }
        }

        let file_name = file_name_of(&target.path, &target.name);
        let destination = match (mode, &options.backup_dir) {
            (ResolutionMode::Move { target_dir }, _) => Some(target_dir),
            (ResolutionMode::Remove, Some(backup_dir)) => Some(backup_dir),
            (ResolutionMode::Remove, None) => None,
        }
        .map(|dir| {
            let path = generate_unique_filename(dir, &file_name, &reserved);
            reserved.insert(path.clone());
            path
        });

        let record = OperationRecord::new(kind, &target.path, destination.clone(), target.size);
        if options.dry_run {
            debug!("Would {} {}", kind, target.path.display());
            result.add_record(record);
            continue;
        }

        let outcome = match &destination {
            Some(dest) => move_file(&target.path, dest),
            None => fs::remove_file(&target.path),
        };

        let record = match outcome {
            Ok(()) => {
                let id = log.as_deref_mut().map(|log| match (mode, &destination) {
                    (ResolutionMode::Move { .. }, Some(dest)) => log.record_move(&target.path, dest),
                    (_, backup) => log.record_delete(&target.path, backup.as_deref()),
                });
                info!("{} {}", kind, target.path.display());
                record.completed(id)
            }
            Err(e) => record.failed(Error::io(&target.path, e)),
        };
        result.add_record(record);
    }

    if let Some(log) = log {
        log.end_batch();
    }
    Ok(result)
}

/// How a transfer touches the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Move,
    Copy,
    Rename,
}

impl TransferKind {
    fn operation_kind(self) -> OperationKind {
        match self {
            TransferKind::Move => OperationKind::Move,
            TransferKind::Copy => OperationKind::Copy,
            TransferKind::Rename => OperationKind::Rename,
        }
    }
}

/// A planned relocation produced by the organizer or the renamer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub source: PathBuf,
    pub size: u64,
    pub target_dir: PathBuf,
    pub file_name: String,
    pub kind: TransferKind,
}

/// Execute organize/rename intents with the same collision suffixing and
/// dry-run fidelity as [`execute`].
pub fn execute_transfers(
    intents: &[TransferIntent],
    dry_run: bool,
    mut log: Option<&mut OperationLog>,
) -> Result<ActionResult> {
    let mut result = ActionResult::new();
    let mut reserved: HashSet<PathBuf> = HashSet::new();
    if !dry_run {
        result.batch = log.as_deref_mut().map(OperationLog::begin_batch);
    }

    for intent in intents {
        let kind = intent.kind.operation_kind();

        if intent.target_dir.join(&intent.file_name) == intent.source {
            result.add_record(
                OperationRecord::new(kind, &intent.source, None, intent.size)
                    .skipped("already in place"),
            );
            continue;
        }

        let destination = generate_unique_filename(&intent.target_dir, &intent.file_name, &reserved);
        reserved.insert(destination.clone());

        let record = OperationRecord::new(kind, &intent.source, Some(destination.clone()), intent.size);
        if dry_run {
            debug!("Would {} {} -> {}", kind, intent.source.display(), destination.display());
            result.add_record(record);
            continue;
        }

        if let Err(e) = fs::create_dir_all(&intent.target_dir) {
            result.add_record(record.failed(Error::io(&intent.target_dir, e)));
            continue;
        }

        let outcome = match intent.kind {
            TransferKind::Move | TransferKind::Rename => move_file(&intent.source, &destination),
            TransferKind::Copy => fs::copy(&intent.source, &destination).map(|_| ()),
        };

        let record = match outcome {
            Ok(()) => {
                let id = log.as_deref_mut().map(|log| match intent.kind {
                    TransferKind::Move => log.record_move(&intent.source, &destination),
                    TransferKind::Copy => log.record_copy(&intent.source, &destination),
                    TransferKind::Rename => log.record_rename(&intent.source, &destination),
                });
                info!("{} {} -> {}", kind, intent.source.display(), destination.display());
                record.completed(id)
            }
            Err(e) => record.failed(Error::io(&intent.source, e)),
        };
        result.add_record(record);
    }

    if let Some(log) = log {
        log.end_batch();
    }
    Ok(result)
}

fn file_name_of(path: &Path, fallback: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

fn prepare_dir(dir: &Path, dry_run: bool) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "{} exists and is not a directory",
            dir.display()
        )));
    }
    if !dry_run {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    Ok(())
}
