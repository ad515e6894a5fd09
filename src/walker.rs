use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::ErrorKind;
use crate::ScanIssue;

/// Directory names pruned from every walk unless configured otherwise.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    ".svn",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
];

pub fn default_exclude_dirs() -> BTreeSet<String> {
    DEFAULT_EXCLUDE_DIRS.iter().map(|d| d.to_string()).collect()
}

pub fn is_hidden_name(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Lazily enumerates regular files under a root.
///
/// Excluded directory names prune the whole subtree at any depth. With
/// `include_hidden` off, any file or directory whose name starts with a dot
/// is skipped. Entries are visited in file-name order within each directory
/// and symlinks are not followed.
#[derive(Debug, Clone)]
pub struct Walker {
    exclude_dirs: BTreeSet<String>,
    include_hidden: bool,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new(default_exclude_dirs(), false)
    }
}

impl Walker {
    pub fn new(exclude_dirs: BTreeSet<String>, include_hidden: bool) -> Self {
        Self {
            exclude_dirs,
            include_hidden,
        }
    }

    /// Walk `root`. Per-entry failures are yielded as `Err` and do not stop the walk.
    pub fn walk<'a>(
        &'a self,
        root: &Path,
    ) -> impl Iterator<Item = Result<PathBuf, ScanIssue>> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| self.should_descend(entry))
            .filter_map(|item| match item {
                Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
                Ok(_) => None,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    let kind = err
                        .io_error()
                        .map(|e| ErrorKind::from_io(e.kind()))
                        .unwrap_or(ErrorKind::IoFailure);
                    warn!("Could not walk {}: {}", path.display(), err);
                    Some(Err(ScanIssue {
                        path,
                        kind,
                        message: io::Error::from(err).to_string(),
                    }))
                }
            })
    }

    fn should_descend(&self, entry: &DirEntry) -> bool {
        // the root itself is always walked
        if entry.depth() == 0 {
            return true;
        }

        let name = entry.file_name();
        if !self.include_hidden && is_hidden_name(name) {
            return false;
        }

        if entry.file_type().is_dir() {
            return !self.exclude_dirs.contains(name.to_string_lossy().as_ref());
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn names(walker: &Walker, root: &Path) -> Vec<String> {
        walker
            .walk(root)
            .filter_map(|r| r.ok())
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("src/node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".hidden_dir")).unwrap();
        fs::create_dir_all(root.join("deep/a/.git")).unwrap();
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join(".dotfile"), "d").unwrap();
        fs::write(root.join("src/main.rs"), "m").unwrap();
        fs::write(root.join("src/node_modules/pkg/index.js"), "i").unwrap();
        fs::write(root.join(".hidden_dir/inner.txt"), "h").unwrap();
        fs::write(root.join("deep/a/.git/config"), "c").unwrap();
        fs::write(root.join("deep/a/file.md"), "f").unwrap();
    }

    #[test]
    fn test_prunes_excluded_and_hidden() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());

        let found = names(&Walker::default(), dir.path());
        assert_eq!(found, vec!["a.txt", "b.txt", "deep/a/file.md", "src/main.rs"]);
    }

    #[test]
    fn test_include_hidden_still_prunes_excluded_names() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());

        let walker = Walker::new(default_exclude_dirs(), true);
        let found = names(&walker, dir.path());
        assert!(found.contains(&".dotfile".to_string()));
        assert!(found.contains(&".hidden_dir/inner.txt".to_string()));
        assert!(!found.iter().any(|p| p.contains(".git")));
        assert!(!found.iter().any(|p| p.contains("node_modules")));
    }

    #[test]
    fn test_missing_root_reports_error() {
        let dir = tempdir().unwrap();
        let walker = Walker::default();
        let results: Vec<_> = walker.walk(&dir.path().join("missing")).collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap_err().kind, ErrorKind::NotFound);
    }
}
