use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::utils::{move_file, write_atomic};

/// Layout version of the persisted log.
pub const LOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Move,
    Copy,
    Delete,
    Rename,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Move => "move",
            OperationKind::Copy => "copy",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
        })
    }
}

/// One filesystem action as it was executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: u64,
    /// Every action of one command shares a batch id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<u64>,
    pub kind: OperationKind,
    pub source: PathBuf,
    /// Absent for deletes.
    pub destination: Option<PathBuf>,
    /// Copy kept before a delete, if one was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub can_undo: bool,
    pub undone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undone_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogDocument {
    version: u32,
    next_id: u64,
    #[serde(default)]
    next_batch: u64,
    operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    pub total: usize,
    pub undone: usize,
    pub undoable: usize,
    pub by_kind: BTreeMap<OperationKind, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoStatus {
    Undone,
    Simulated,
    Failed,
}

/// What happened to one operation of an undone batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoOutcome {
    pub id: u64,
    pub kind: OperationKind,
    pub source: PathBuf,
    pub status: UndoStatus,
    pub error: Option<String>,
}

/// Append-mostly record of executed operations, persisted as one JSON document.
///
/// Persisting is best-effort: a failed write is logged and the in-memory log
/// stays authoritative for the rest of the process. While a batch is open,
/// writes are deferred until [`OperationLog::end_batch`].
#[derive(Debug)]
pub struct OperationLog {
    path: Option<PathBuf>,
    next_id: u64,
    next_batch: u64,
    current_batch: Option<u64>,
    dirty: bool,
    operations: Vec<Operation>,
}

impl OperationLog {
    /// Open the log stored at `path`. A missing file starts an empty log; an
    /// unparsable or other-version file is moved aside to `<path>.bak`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut log = Self::in_memory();
        log.path = Some(path.clone());

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No operation log at {}; starting fresh", path.display());
                return Ok(log);
            }
            Err(e) => return Err(Error::io(&path, e)),
        };

        match serde_json::from_str::<LogDocument>(&text) {
            Ok(doc) if doc.version == LOG_VERSION => {
                log.next_id = doc.next_id.max(max_id(&doc.operations) + 1);
                log.next_batch = doc.next_batch.max(max_batch(&doc.operations) + 1);
                log.operations = doc.operations;
                debug!("Loaded {} operations from {}", log.operations.len(), path.display());
            }
            Ok(doc) => {
                warn!(
                    "Operation log {} has version {} (expected {})",
                    path.display(),
                    doc.version,
                    LOG_VERSION
                );
                set_aside(&path);
            }
            Err(e) => {
                warn!("Operation log {} is unreadable: {}", path.display(), e);
                set_aside(&path);
            }
        }

        Ok(log)
    }

    /// A log that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            next_id: 1,
            next_batch: 1,
            current_batch: None,
            dirty: false,
            operations: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Start grouping recorded operations under a fresh batch id. Writes are
    /// held back until [`OperationLog::end_batch`].
    pub fn begin_batch(&mut self) -> u64 {
        if let Some(open) = self.current_batch {
            return open;
        }
        let batch = self.next_batch;
        self.next_batch += 1;
        self.current_batch = Some(batch);
        debug!("Opened batch {}", batch);
        batch
    }

    /// Close the open batch, if any, and write everything recorded in it.
    pub fn end_batch(&mut self) {
        if let Some(batch) = self.current_batch.take() {
            debug!("Closed batch {}", batch);
        }
        self.flush();
    }

    fn append(
        &mut self,
        kind: OperationKind,
        source: &Path,
        destination: Option<&Path>,
        backup: Option<&Path>,
        can_undo: bool,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.operations.push(Operation {
            id,
            batch: self.current_batch,
            kind,
            source: source.to_path_buf(),
            destination: destination.map(Path::to_path_buf),
            backup: backup.map(Path::to_path_buf),
            timestamp: Utc::now(),
            can_undo,
            undone: false,
            undone_at: None,
        });
        debug!("Logged {} #{}: {}", kind, id, source.display());
        self.changed();
        id
    }

    pub fn record_move(&mut self, source: &Path, destination: &Path) -> u64 {
        self.append(OperationKind::Move, source, Some(destination), None, true)
    }

    pub fn record_copy(&mut self, source: &Path, destination: &Path) -> u64 {
        self.append(OperationKind::Copy, source, Some(destination), None, true)
    }

    pub fn record_rename(&mut self, source: &Path, destination: &Path) -> u64 {
        self.append(OperationKind::Rename, source, Some(destination), None, true)
    }

    /// Deletes are undoable only when a backup copy was kept.
    pub fn record_delete(&mut self, source: &Path, backup: Option<&Path>) -> u64 {
        self.append(OperationKind::Delete, source, None, backup, backup.is_some())
    }

    pub fn lookup(&self, id: u64) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Operations recorded under `batch`, in recording order.
    pub fn batch(&self, batch: u64) -> Vec<&Operation> {
        self.operations
            .iter()
            .filter(|op| op.batch == Some(batch))
            .collect()
    }

    pub fn mark_undone(&mut self, id: u64) -> Result<()> {
        self.set_undone(id)?;
        self.changed();
        Ok(())
    }

    fn set_undone(&mut self, id: u64) -> Result<()> {
        let op = self
            .operations
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or(Error::OperationNotFound(id))?;
        op.undone = true;
        op.undone_at = Some(Utc::now());
        Ok(())
    }

    /// Reverse operation `id`. Nothing on disk is overwritten: a move is only
    /// reversed while its destination exists and its source does not.
    pub fn undo(&mut self, id: u64) -> Result<()> {
        let op = self.lookup(id).cloned().ok_or(Error::OperationNotFound(id))?;
        check_undoable(&op)?;
        reverse(&op, false)?;
        self.mark_undone(id)?;
        info!("Undid {} #{} ({})", op.kind, id, op.source.display());
        Ok(())
    }

    /// Reverse every operation of `batch`, newest first. A failing operation
    /// does not stop the rest. With `dry_run` only the preconditions are
    /// checked and nothing is changed.
    pub fn undo_batch(&mut self, batch: u64, dry_run: bool) -> Result<Vec<UndoOutcome>> {
        let mut ops: Vec<Operation> = self.batch(batch).into_iter().cloned().collect();
        if ops.is_empty() {
            return Err(Error::BatchNotFound(batch));
        }
        ops.reverse();

        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            let result = check_undoable(&op).and_then(|()| reverse(&op, dry_run));
            let (status, error) = match result {
                Ok(()) if dry_run => (UndoStatus::Simulated, None),
                Ok(()) => {
                    self.set_undone(op.id)?;
                    self.dirty = true;
                    (UndoStatus::Undone, None)
                }
                Err(e) => {
                    warn!("Could not undo {} #{}: {}", op.kind, op.id, e);
                    (UndoStatus::Failed, Some(e.to_string()))
                }
            };
            outcomes.push(UndoOutcome {
                id: op.id,
                kind: op.kind,
                source: op.source,
                status,
                error,
            });
        }

        self.flush();
        let failed = outcomes.iter().filter(|o| o.status == UndoStatus::Failed).count();
        info!(
            "Undo of batch {} complete: {} succeeded, {} failed",
            batch,
            outcomes.len() - failed,
            failed
        );
        Ok(outcomes)
    }

    /// Most recent operations first.
    pub fn recent(&self, limit: usize) -> Vec<&Operation> {
        self.operations.iter().rev().take(limit).collect()
    }

    /// Most recent operations that can still be undone, newest first.
    pub fn undoable(&self, limit: usize) -> Vec<&Operation> {
        self.operations
            .iter()
            .rev()
            .filter(|op| op.can_undo && !op.undone)
            .take(limit)
            .collect()
    }

    pub fn stats(&self) -> LogStats {
        let mut stats = LogStats {
            total: self.operations.len(),
            ..LogStats::default()
        };
        for op in &self.operations {
            *stats.by_kind.entry(op.kind).or_default() += 1;
            if op.undone {
                stats.undone += 1;
            } else if op.can_undo {
                stats.undoable += 1;
            }
        }
        stats
    }

    /// Forget every recorded operation. Ids are never reused.
    pub fn clear(&mut self) -> usize {
        let removed = self.operations.len();
        self.operations.clear();
        self.changed();
        info!("Cleared {} operations from history", removed);
        removed
    }

    fn changed(&mut self) {
        self.dirty = true;
        if self.current_batch.is_none() {
            self.flush();
        }
    }

    /// Write pending changes to disk.
    pub fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let Some(path) = &self.path else {
            return;
        };
        let doc = LogDocument {
            version: LOG_VERSION,
            next_id: self.next_id,
            next_batch: self.next_batch,
            operations: self.operations.clone(),
        };
        let result = serde_json::to_vec_pretty(&doc)
            .map_err(|e| Error::InvalidArgument(e.to_string()))
            .and_then(|bytes| write_atomic(path, &bytes));
        if let Err(e) = result {
            warn!("Could not save operation log {}: {}", path.display(), e);
        }
    }
}

impl Drop for OperationLog {
    fn drop(&mut self) {
        self.flush();
    }
}

fn max_id(operations: &[Operation]) -> u64 {
    operations.iter().map(|op| op.id).max().unwrap_or(0)
}

fn max_batch(operations: &[Operation]) -> u64 {
    operations.iter().filter_map(|op| op.batch).max().unwrap_or(0)
}

fn set_aside(path: &Path) {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    let backup = path.with_file_name(name);
    match fs::rename(path, &backup) {
        Ok(()) => warn!("Moved unusable operation log to {}", backup.display()),
        Err(e) => warn!("Could not move {} aside: {}", path.display(), e),
    }
}

fn check_undoable(op: &Operation) -> Result<()> {
    if op.undone {
        return Err(Error::AlreadyUndone(op.id));
    }
    if !op.can_undo {
        return Err(Error::NotUndoable(op.id));
    }
    Ok(())
}

/// Put the filesystem back the way it was before `op`. With `dry_run` only
/// the preconditions are checked.
fn reverse(op: &Operation, dry_run: bool) -> Result<()> {
    match op.kind {
        OperationKind::Move | OperationKind::Rename => {
            let destination = required(op, op.destination.as_deref(), "destination")?;
            move_back(destination, &op.source, dry_run)
        }
        OperationKind::Copy => {
            let copy = required(op, op.destination.as_deref(), "destination")?;
            if dry_run {
                return Ok(());
            }
            match fs::remove_file(copy) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Copy {} already gone", copy.display());
                    Ok(())
                }
                Err(e) => Err(Error::io(copy, e)),
            }
        }
        OperationKind::Delete => {
            let backup = required(op, op.backup.as_deref(), "backup")?;
            move_back(backup, &op.source, dry_run)
        }
    }
}

fn required<'a>(op: &Operation, path: Option<&'a Path>, what: &str) -> Result<&'a Path> {
    path.ok_or_else(|| {
        Error::PreconditionFailed(format!("operation {} has no recorded {}", op.id, what))
    })
}

fn move_back(from: &Path, to: &Path, dry_run: bool) -> Result<()> {
    if !from.exists() {
        return Err(Error::PreconditionFailed(format!(
            "{} no longer exists",
            from.display()
        )));
    }
    if to.exists() {
        return Err(Error::PreconditionFailed(format!(
            "{} already exists; refusing to overwrite",
            to.display()
        )));
    }
    if dry_run {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    move_file(from, to).map_err(|e| Error::io(from, e))
}
