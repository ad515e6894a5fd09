use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use tracing::debug;

use crate::actions::{TransferIntent, TransferKind};
use crate::error::{Error, Result};
use crate::utils::split_filename;
use crate::{FileEntry, NO_EXTENSION};

/// Extension (lowercase, no dot) to folder name
pub const FILE_CATEGORIES: &[(&str, &[&str])] = &[
    ("Documents", &["pdf", "doc", "docx", "txt", "rtf", "odt", "tex"]),
    ("Spreadsheets", &["xls", "xlsx", "csv", "ods"]),
    ("Presentations", &["ppt", "pptx", "key", "odp"]),
    ("Images", &["jpg", "jpeg", "png", "gif", "bmp", "svg", "ico", "webp", "tiff"]),
    ("Videos", &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm"]),
    ("Audio", &["mp3", "wav", "flac", "aac", "ogg", "m4a", "wma"]),
    ("Archives", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
    ("Code", &["py", "js", "java", "cpp", "c", "h", "cs", "php", "rb", "go", "rs", "swift"]),
    ("Web", &["html", "css", "scss", "sass", "less"]),
    ("Data", &["json", "xml", "yaml", "yml", "sql", "db", "sqlite"]),
    ("Executables", &["exe", "msi", "app", "deb", "rpm", "dmg"]),
    ("Fonts", &["ttf", "otf", "woff", "woff2"]),
];

pub const OTHER_CATEGORY: &str = "Other";

pub fn category_of(extension: &str) -> &'static str {
    FILE_CATEGORIES
        .iter()
        .find(|(_, extensions)| extensions.contains(&extension))
        .map(|(category, _)| *category)
        .unwrap_or(OTHER_CATEGORY)
}

/// A placement strategy: decides whether it applies to a file and where the
/// file should go.
pub trait OrganizeRule: Send + Sync {
    fn name(&self) -> &str;

    fn should_handle(&self, entry: &FileEntry) -> bool;

    /// Directory under `target_root` that `entry` belongs in.
    fn target_dir_for(&self, entry: &FileEntry, target_root: &Path) -> PathBuf;
}

/// Files go into a folder named after their type.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryRule;

impl OrganizeRule for CategoryRule {
    fn name(&self) -> &str {
        "category"
    }

    fn should_handle(&self, _entry: &FileEntry) -> bool {
        true
    }

    fn target_dir_for(&self, entry: &FileEntry, target_root: &Path) -> PathBuf {
        target_root.join(category_of(&entry.extension))
    }
}

/// Files go into date folders built from their effective date (content date,
/// else modification time) in local time.
#[derive(Debug, Clone)]
pub struct DateRule {
    format: String,
}

pub const DEFAULT_DATE_FORMAT: &str = "%Y/%m";

impl DateRule {
    pub fn new(format: &str) -> Result<Self> {
        validate_strftime(format)?;
        Ok(Self {
            format: format.to_string(),
        })
    }
}

impl Default for DateRule {
    fn default() -> Self {
        Self {
            format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

impl OrganizeRule for DateRule {
    fn name(&self) -> &str {
        "date"
    }

    fn should_handle(&self, _entry: &FileEntry) -> bool {
        true
    }

    fn target_dir_for(&self, entry: &FileEntry, target_root: &Path) -> PathBuf {
        let local = entry.effective_date().with_timezone(&Local);
        target_root.join(local.format(&self.format).to_string())
    }
}

/// Images go under `Photos/YYYY/MM/DD` when a content date is known, else
/// `Photos/Undated`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhotoRule;

impl OrganizeRule for PhotoRule {
    fn name(&self) -> &str {
        "photo"
    }

    fn should_handle(&self, entry: &FileEntry) -> bool {
        category_of(&entry.extension) == "Images"
    }

    fn target_dir_for(&self, entry: &FileEntry, target_root: &Path) -> PathBuf {
        let photos = target_root.join("Photos");
        match entry.content_date {
            Some(date) => photos.join(date.with_timezone(&Local).format("%Y/%m/%d").to_string()),
            None => photos.join("Undated"),
        }
    }
}

/// Ordered set of rules; the first rule that handles a file places it.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn OrganizeRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, rule: impl OrganizeRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn by_type() -> Self {
        Self::new().register(CategoryRule)
    }

    pub fn by_date(format: &str) -> Result<Self> {
        Ok(Self::new().register(DateRule::new(format)?))
    }

    /// Photos by capture date, everything else by type.
    pub fn smart() -> Self {
        Self::new().register(PhotoRule).register(CategoryRule)
    }

    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn rule_for(&self, entry: &FileEntry) -> Option<&dyn OrganizeRule> {
        self.rules
            .iter()
            .find(|rule| rule.should_handle(entry))
            .map(|rule| rule.as_ref())
    }
}

/// Plan where every entry goes under `target_root`. Entries no rule handles
/// stay where they are.
pub fn plan_organize(
    entries: &[FileEntry],
    registry: &RuleRegistry,
    target_root: &Path,
    kind: TransferKind,
) -> Vec<TransferIntent> {
    entries
        .iter()
        .filter_map(|entry| {
            let rule = registry.rule_for(entry)?;
            let target_dir = rule.target_dir_for(entry, target_root);
            debug!("{} -> {} ({})", entry.path.display(), target_dir.display(), rule.name());
            Some(TransferIntent {
                source: entry.path.clone(),
                size: entry.size,
                target_dir,
                file_name: entry.name.clone(),
                kind,
            })
        })
        .collect()
}

const TEMPLATE_VARIABLES: &[&str] = &["date", "time", "name", "ext", "counter"];

/// File name template with `{date}` (YYYY-MM-DD), `{time}` (HH-MM-SS),
/// `{name}` (stem), `{ext}` (extension without dot) and `{counter}` (001, 002, ...).
/// The original extension is appended when the rendered name does not end with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    template: String,
}

impl NameTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        if template.trim().is_empty() {
            return Err(Error::InvalidArgument("rename template is empty".to_string()));
        }
        if template.contains('/') || template.contains('\\') {
            return Err(Error::InvalidArgument(format!(
                "rename template '{}' must not contain path separators",
                template
            )));
        }

        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                Error::InvalidArgument(format!("unclosed '{{' in template '{}'", template))
            })?;
            let variable = &after[..close];
            if !TEMPLATE_VARIABLES.contains(&variable) {
                return Err(Error::InvalidArgument(format!(
                    "unknown template variable '{{{}}}'",
                    variable
                )));
            }
            rest = &after[close + 1..];
        }

        Ok(Self {
            template: template.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn render(&self, entry: &FileEntry, counter: usize) -> String {
        let date = entry.effective_date().with_timezone(&Local);
        let (stem, ext) = split_filename(&entry.name);

        let mut name = self
            .template
            .replace("{date}", &date.format("%Y-%m-%d").to_string())
            .replace("{time}", &date.format("%H-%M-%S").to_string())
            .replace("{name}", &stem)
            .replace("{ext}", &ext)
            .replace("{counter}", &format!("{:03}", counter));

        if !ext.is_empty() && entry.extension != NO_EXTENSION {
            let suffix = format!(".{}", ext);
            if !name.ends_with(&suffix) {
                name.push_str(&suffix);
            }
        }
        name
    }
}

/// Plan in-place renames; the counter follows the order of `entries`, starting at 1.
pub fn plan_rename(entries: &[FileEntry], template: &NameTemplate) -> Vec<TransferIntent> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| TransferIntent {
            source: entry.path.clone(),
            size: entry.size,
            target_dir: entry
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            file_name: template.render(entry, i + 1),
            kind: TransferKind::Rename,
        })
        .collect()
}

fn validate_strftime(format: &str) -> Result<()> {
    if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::InvalidArgument(format!(
            "invalid date format '{}'",
            format
        )));
    }
    Ok(())
}
