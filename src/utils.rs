use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use humansize::{format_size, DECIMAL};

use crate::error::{Error, Result};

/// Format file size in human-readable format
pub fn format_file_size(size: u64) -> String {
    format_size(size, DECIMAL)
}

/// Pick a destination for `original_name` inside `dir` that neither exists on
/// disk nor appears in `reserved`, appending `_1`, `_2`, ... before the extension.
pub fn generate_unique_filename(
    dir: &Path,
    original_name: &str,
    reserved: &HashSet<PathBuf>,
) -> PathBuf {
    let taken = |p: &Path| p.exists() || reserved.contains(p);

    let mut path = dir.join(original_name);
    let mut counter = 1;
    let (stem, ext) = split_filename(original_name);

    while taken(&path) {
        let new_name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        path = dir.join(new_name);
        counter += 1;
    }

    path
}

/// Split filename into stem and extension
pub fn split_filename(filename: &str) -> (String, String) {
    match filename.rfind('.') {
        // a leading dot names a hidden file, not an extension
        Some(dot_pos) if dot_pos > 0 => {
            let stem = filename[..dot_pos].to_string();
            let ext = filename[dot_pos + 1..].to_string();
            (stem, ext)
        }
        _ => (filename.to_string(), String::new()),
    }
}

/// Move a file, falling back to copy-then-delete when a plain rename is
/// refused (for example across filesystems).
pub fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(_) => {
            fs::copy(source, destination)?;
            if let Err(e) = fs::remove_file(source) {
                let _ = fs::remove_file(destination);
                return Err(e);
            }
            Ok(())
        }
    }
}

/// Write `contents` to a sibling temp file and rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(path, e));
    }
    Ok(())
}

/// Absolute form of `path` with symlinks and `..` resolved as far as the
/// path exists. The missing tail, if any, is appended unchanged.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::io(path, e))?
            .join(path)
    };

    let mut missing = Vec::new();
    let mut existing = absolute.as_path();
    loop {
        match existing.canonicalize() {
            Ok(resolved) => {
                return Ok(missing
                    .iter()
                    .rev()
                    .fold(resolved, |acc: PathBuf, part| acc.join(part)));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(Error::io(path, e)),
                }
            }
            Err(e) => return Err(Error::io(path, e)),
        }
    }
}

/// Path of `to` relative to `from`, or `to` unchanged when no relative form exists.
pub fn display_relative(from: &Path, to: &Path) -> PathBuf {
    pathdiff::diff_paths(to, from).unwrap_or_else(|| to.to_path_buf())
}

/// Format duration in human-readable format
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Calculate the percentage of one number relative to another
pub fn calculate_percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}
