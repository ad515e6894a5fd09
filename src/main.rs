use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use tracing::warn;

use tidyfs::actions::{OperationRecord, OperationStatus, TransferKind};
use tidyfs::dedup::{analyze_duplicates, short_digest};
use tidyfs::logging::init_logging;
use tidyfs::oplog::Operation;
use tidyfs::organize::{plan_organize, plan_rename, NameTemplate, RuleRegistry, DEFAULT_DATE_FORMAT};
use tidyfs::utils::{
    calculate_percentage, display_relative, format_duration, format_file_size, resolve_path,
};
use tidyfs::{
    execute, execute_transfers, plan, ActionResult, Config, DuplicateIntent, ExecuteOptions,
    HashAlgorithm, HashMode, KeepStrategy, OperationLog, ResolutionMode, ScanCache, ScanReport,
    Scanner, UndoOutcome, UndoStatus,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Hash every byte
    Full,
    /// Hash size plus the first and last half-window
    Quick,
    /// Quick for large files, full otherwise
    Smart,
}

impl From<ModeArg> for HashMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => HashMode::Full,
            ModeArg::Quick => HashMode::Quick,
            ModeArg::Smart => HashMode::Smart,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Sha256,
    Md5,
    Blake3,
}

impl From<AlgorithmArg> for HashAlgorithm {
    fn from(algorithm: AlgorithmArg) -> Self {
        match algorithm {
            AlgorithmArg::Sha256 => HashAlgorithm::Sha256,
            AlgorithmArg::Md5 => HashAlgorithm::Md5,
            AlgorithmArg::Blake3 => HashAlgorithm::Blake3,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeepArg {
    Newest,
    Oldest,
    ShortestPath,
    First,
}

impl From<KeepArg> for KeepStrategy {
    fn from(keep: KeepArg) -> Self {
        match keep {
            KeepArg::Newest => KeepStrategy::Newest,
            KeepArg::Oldest => KeepStrategy::Oldest,
            KeepArg::ShortestPath => KeepStrategy::ShortestPath,
            KeepArg::First => KeepStrategy::First,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionType {
    /// List duplicate files without taking any action
    List,
    /// Delete duplicate files
    Remove,
    /// Move duplicate files to a specified directory
    Move,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrganizeBy {
    /// Folders per file type (Documents, Images, ...)
    Type,
    /// Date folders from the file's date
    Date,
    /// Photos by capture date, everything else by type
    Smart,
}

#[derive(Parser)]
#[command(
    name = "tidyfs",
    version,
    about = "Scan, deduplicate and organize personal files, with undo",
    long_about = "Incrementally scan directory trees, find duplicate files by content fingerprint, resolve them with a keep strategy, organize or rename files, and undo logged operations."
)]
struct Cli {
    /// Configuration file (defaults to <data dir>/config.json when present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    /// Ignore and do not update the scan cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Number of hashing threads
    #[arg(long, global = true, help = "Number of hashing threads (default: all cores)")]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct ScanArgs {
    /// Directory to scan
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Include hidden files and directories
    #[arg(long)]
    include_hidden: bool,

    /// Hashing mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Digest algorithm
    #[arg(long, value_enum)]
    algorithm: Option<AlgorithmArg>,

    /// Hash on a single thread
    #[arg(long)]
    sequential: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and summarize files and duplicates
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Print a duplicate analysis with recommendations
        #[arg(long)]
        analyze: bool,
    },

    /// Show the last cached report for a directory without rescanning
    Report {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Find and resolve duplicate files
    Dedupe {
        #[command(flatten)]
        scan: ScanArgs,

        /// Which copy to keep
        #[arg(short, long, value_enum)]
        keep: Option<KeepArg>,

        /// Action to take on duplicate files
        #[arg(short, long, value_enum, default_value = "list")]
        action: ActionType,

        /// Target directory for move action
        #[arg(long, value_name = "PATH")]
        target: Option<PathBuf>,

        /// Move removed files here so removals can be undone
        #[arg(long, value_name = "PATH")]
        backup_dir: Option<PathBuf>,

        /// Trust quick fingerprints without a full comparison
        #[arg(long)]
        no_verify: bool,

        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompts (use with caution)
        #[arg(short, long)]
        yes: bool,
    },

    /// Move or copy files into a structured folder tree
    Organize {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Root of the organized tree
        #[arg(long, value_name = "PATH")]
        target: PathBuf,

        #[arg(long, value_enum, default_value = "type")]
        by: OrganizeBy,

        /// strftime format for date folders
        #[arg(long, default_value = DEFAULT_DATE_FORMAT)]
        date_format: String,

        /// Copy instead of move
        #[arg(long)]
        copy: bool,

        #[arg(long)]
        include_hidden: bool,

        #[arg(long)]
        dry_run: bool,

        #[arg(short, long)]
        yes: bool,
    },

    /// Rename files in place from a template
    Rename {
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Variables: {date} {time} {name} {ext} {counter}
        #[arg(long, default_value = "{date}_{name}")]
        template: String,

        #[arg(long)]
        include_hidden: bool,

        #[arg(long)]
        dry_run: bool,

        #[arg(short, long)]
        yes: bool,
    },

    /// Undo a logged operation (the most recent undoable one by default)
    Undo {
        /// Operation id
        id: Option<u64>,

        /// Undo every operation of one dedupe, organize or rename run
        #[arg(long, conflicts_with = "id")]
        batch: Option<u64>,

        /// Only check whether the batch can be undone
        #[arg(long, requires = "batch")]
        dry_run: bool,
    },

    /// Show logged operations
    History {
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Only operations that can still be undone
        #[arg(long)]
        undoable: bool,

        /// Show counts instead of entries
        #[arg(long)]
        stats: bool,

        /// Forget all logged operations
        #[arg(long)]
        clear: bool,

        #[arg(short, long)]
        yes: bool,
    },

    /// Manage the scan cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Remove every cached scan
    Clear,
    /// Remove cached data for one directory
    Invalidate {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Drop cached fingerprints not seen by any scan for a number of days
    Prune {
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::discover(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.no_cache {
        config.use_cache = false;
    }
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }
    config.validate()?;

    match cli.command {
        Command::Scan { scan, json, analyze } => {
            let report = run_scan(&config, &scan, !json)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display_report(&report, cli.verbose);
                if analyze {
                    analyze_duplicates(&report).print_analysis();
                }
            }
        }
        Command::Report { path, json } => show_cached_report(&config, &path, json, cli.verbose)?,
        Command::Dedupe {
            scan,
            keep,
            action,
            target,
            backup_dir,
            no_verify,
            dry_run,
            yes,
        } => {
            let report = run_scan(&config, &scan, true)?;
            if report.duplicate_groups.is_empty() {
                println!("{}", style("✅ No duplicate files found!").green().bold());
                return Ok(());
            }
            display_report(&report, cli.verbose);

            let strategy = keep.map(KeepStrategy::from).unwrap_or(config.keep_strategy);
            let intents = plan(&report.duplicate_groups, strategy);
            print_plan(&intents, strategy);

            let mode = match action {
                ActionType::List => return Ok(()),
                ActionType::Remove => ResolutionMode::Remove,
                ActionType::Move => ResolutionMode::from_parts("move", target)?,
            };

            if !confirm(dry_run, yes, "Do you want to proceed with the selected action?")? {
                return Ok(());
            }

            let options = ExecuteOptions {
                dry_run,
                verify_before_delete: config.verify_before_delete && !no_verify,
                backup_dir,
                algorithm: config.hash_algorithm,
            };
            let mut log = open_log(&config)?;
            let result = execute(&intents, &mode, &options, Some(&mut log))?;
            print_records(&result.records, &report.root);
            result.print_summary();
            print_undo_hint(&result);
        }
        Command::Organize {
            path,
            target,
            by,
            date_format,
            copy,
            include_hidden,
            dry_run,
            yes,
        } => {
            let target = resolve_path(&target)?;
            let mut report = inventory(&config, &path, include_hidden)?;
            report.entries.retain(|e| !e.path.starts_with(&target));

            let registry = match by {
                OrganizeBy::Type => RuleRegistry::by_type(),
                OrganizeBy::Date => RuleRegistry::by_date(&date_format)?,
                OrganizeBy::Smart => RuleRegistry::smart(),
            };
            let kind = if copy { TransferKind::Copy } else { TransferKind::Move };
            let intents = plan_organize(&report.entries, &registry, &target, kind);
            println!(
                "{} {} files into {}",
                style(if copy { "📂 Copying" } else { "📂 Moving" }).cyan().bold(),
                intents.len(),
                target.display()
            );

            if intents.is_empty() || !confirm(dry_run, yes, "Organize these files?")? {
                return Ok(());
            }
            let mut log = open_log(&config)?;
            let result = execute_transfers(&intents, dry_run, Some(&mut log))?;
            print_records(&result.records, &report.root);
            result.print_summary();
            print_undo_hint(&result);
        }
        Command::Rename {
            path,
            template,
            include_hidden,
            dry_run,
            yes,
        } => {
            let template = NameTemplate::parse(&template)?;
            let report = inventory(&config, &path, include_hidden)?;
            let intents = plan_rename(&report.entries, &template);
            println!(
                "{} {} files with '{}'",
                style("✏️  Renaming").cyan().bold(),
                intents.len(),
                template.as_str()
            );

            if intents.is_empty() || !confirm(dry_run, yes, "Rename these files?")? {
                return Ok(());
            }
            let mut log = open_log(&config)?;
            let result = execute_transfers(&intents, dry_run, Some(&mut log))?;
            print_records(&result.records, &report.root);
            result.print_summary();
            print_undo_hint(&result);
        }
        Command::Undo {
            batch: Some(batch),
            dry_run,
            ..
        } => {
            let mut log = open_log(&config)?;
            let outcomes = log
                .undo_batch(batch, dry_run)
                .with_context(|| format!("Failed to undo batch {}", batch))?;
            print_undo_outcomes(batch, &outcomes);
        }
        Command::Undo { id, .. } => {
            let mut log = open_log(&config)?;
            let id = match id {
                Some(id) => id,
                None => match log.undoable(1).first() {
                    Some(op) => op.id,
                    None => {
                        println!("{}", style("Nothing to undo").yellow());
                        return Ok(());
                    }
                },
            };
            log.undo(id).with_context(|| format!("Failed to undo operation {}", id))?;
            if let Some(op) = log.lookup(id) {
                println!("{} {}", style("↩️  Undone:").green().bold(), describe(op));
            }
        }
        Command::History {
            limit,
            undoable,
            stats,
            clear,
            yes,
        } => {
            let mut log = open_log(&config)?;
            if clear {
                if confirm(false, yes, "Forget all logged operations?")? {
                    let removed = log.clear();
                    println!("Cleared {} operations", removed);
                }
            } else if stats {
                let stats = log.stats();
                println!("{}", style("📜 Operation History").cyan().bold());
                println!("Total operations: {}", stats.total);
                println!("Undoable: {}", stats.undoable);
                println!("Undone: {}", stats.undone);
                for (kind, count) in &stats.by_kind {
                    println!("  {}: {}", kind, count);
                }
            } else {
                let ops = if undoable { log.undoable(limit) } else { log.recent(limit) };
                if ops.is_empty() {
                    println!("{}", style("No operations recorded").yellow());
                }
                for op in ops {
                    println!("{}", describe(op));
                }
            }
        }
        Command::Cache { command } => {
            let mut cache = ScanCache::open(config.cache_dir())?;
            match command {
                CacheCommand::Clear => {
                    let removed = cache.clear_all();
                    println!("Removed {} cached scans from {}", removed, cache.dir().display());
                }
                CacheCommand::Invalidate { path } => {
                    let root = path
                        .canonicalize()
                        .with_context(|| format!("Cannot resolve {}", path.display()))?;
                    cache.invalidate(&root);
                    println!("Invalidated cache for {}", root.display());
                }
                CacheCommand::Prune { days } => {
                    let removed = cache.prune_older_than(chrono::Duration::days(i64::from(days)));
                    println!("Pruned {} cached fingerprints older than {} days", removed, days);
                }
            }
        }
    }

    Ok(())
}

fn open_cache(config: &Config) -> Option<ScanCache> {
    if !config.use_cache {
        return None;
    }
    match ScanCache::open(config.cache_dir()) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!("Scan cache unavailable, continuing without it: {}", e);
            None
        }
    }
}

fn open_log(config: &Config) -> Result<OperationLog> {
    let path = config.operation_log_path();
    OperationLog::open(&path).with_context(|| format!("Failed to open operation log {}", path.display()))
}

fn run_scan(config: &Config, args: &ScanArgs, show_progress: bool) -> Result<ScanReport> {
    let mut config = config.clone();
    config.include_hidden |= args.include_hidden;
    if let Some(mode) = args.mode {
        config.hash_mode = mode.into();
    }
    if let Some(algorithm) = args.algorithm {
        config.hash_algorithm = algorithm.into();
    }
    if args.sequential {
        config.parallel_hashing = false;
    }

    let mut options = config.scan_options();
    options.show_progress = show_progress;

    if show_progress {
        println!("{}", style("🔍 Scanning for files...").cyan().bold());
    }
    let mut scanner = Scanner::new(options);
    if let Some(cache) = open_cache(&config) {
        scanner = scanner.with_cache(cache);
    }
    scanner
        .scan(&args.path)
        .with_context(|| format!("Failed to scan {}", args.path.display()))
}

fn inventory(config: &Config, path: &Path, include_hidden: bool) -> Result<ScanReport> {
    let mut options = config.scan_options();
    options.include_hidden |= include_hidden;
    Scanner::new(options)
        .inventory(path)
        .with_context(|| format!("Failed to list {}", path.display()))
}

fn show_cached_report(config: &Config, path: &Path, json: bool, verbose: bool) -> Result<()> {
    let root = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve {}", path.display()))?;
    let mut cache = ScanCache::open(config.cache_dir())?;
    match cache.get(&root) {
        Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
        Some(report) => {
            println!(
                "{} {}",
                style("Cached report from").dim(),
                report.scanned_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            display_report(&report, verbose);
        }
        None => println!(
            "{} {}",
            style("No cached report for").yellow(),
            root.display()
        ),
    }
    Ok(())
}

fn confirm(dry_run: bool, yes: bool, prompt: &str) -> Result<bool> {
    if dry_run {
        println!("{}", style("🧪 Dry run mode - no changes will be made").yellow().bold());
        return Ok(true);
    }
    if yes {
        return Ok(true);
    }
    let proceed = dialoguer::Confirm::new().with_prompt(prompt).interact()?;
    if !proceed {
        println!("{}", style("Operation cancelled").yellow());
    }
    Ok(proceed)
}

fn display_report(report: &ScanReport, verbose: bool) {
    println!();
    println!("{}", style("📊 Duplicate Files Found").cyan().bold());
    println!("{}", style("=".repeat(40)).cyan());

    for (digest, files) in &report.duplicate_groups {
        let file_size = files[0].size;
        let waste = file_size * (files.len() as u64 - 1);
        if verbose {
            println!();
            println!(
                "{} {} ({})",
                style("Hash:").bold(),
                short_digest(digest),
                format_file_size(file_size)
            );
            for file in files {
                println!("  📄 {}", display_relative(&report.root, &file.path).display());
            }
        } else {
            println!(
                "{} duplicate files for {} ({})",
                files.len() - 1,
                files[0].name,
                format_file_size(waste)
            );
        }
    }

    let summary = report.summary();
    println!();
    println!("{}", style("📈 Summary").green().bold());
    println!("{}", style("-".repeat(20)).green());
    println!("Root: {}", summary.root.display());
    println!(
        "Total files scanned: {} ({})",
        summary.total_files,
        format_file_size(summary.total_size)
    );
    println!("Duplicate groups: {}", summary.duplicate_groups);
    println!("Duplicate files found: {}", summary.duplicate_files);
    println!(
        "Potential space savings: {} ({:.1}%)",
        format_file_size(summary.wasted_space),
        calculate_percentage(summary.wasted_space, summary.total_size)
    );
    if summary.cache_hits + summary.cache_misses > 0 {
        println!("Cache: {} hits, {} misses", summary.cache_hits, summary.cache_misses);
    }
    println!(
        "Scan time: {}",
        format_duration(std::time::Duration::from_millis(report.duration_ms))
    );

    if verbose && !report.by_extension.is_empty() {
        println!();
        println!("{}", style("Largest file types:").bold());
        for (ext, stats) in report.top_extensions(10) {
            println!(
                "  {:<10} {:>6} files  {:>10} ({:.1}%)",
                ext,
                stats.count,
                format_file_size(stats.bytes),
                calculate_percentage(stats.bytes, summary.total_size)
            );
        }
    }

    if summary.errors > 0 {
        println!("{}", style(format!("⚠️  {} files could not be read", summary.errors)).yellow());
        if verbose {
            for issue in &report.errors {
                println!("  {} ({}): {}", issue.path.display(), issue.kind, issue.message);
            }
        }
    }
}

fn print_plan(intents: &[DuplicateIntent], strategy: KeepStrategy) {
    println!();
    println!(
        "{} {} files to resolve (keep {})",
        style("🗂  Plan:").cyan().bold(),
        intents.len(),
        strategy
    );
    let mut last_keep: Option<&Path> = None;
    for intent in intents {
        if last_keep != Some(intent.keep.path.as_path()) {
            println!("  📄 Keeping: {}", intent.keep.path.display());
            last_keep = Some(intent.keep.path.as_path());
        }
        println!("     ✖ {}", intent.target.path.display());
    }
}

fn print_records(records: &[OperationRecord], root: &Path) {
    println!();
    for record in records {
        let source = display_relative(root, &record.source);
        let arrow = record
            .destination
            .as_ref()
            .map(|d| format!(" -> {}", d.display()))
            .unwrap_or_default();
        match record.status {
            OperationStatus::Completed => {
                println!("✅ {} {}{}", record.kind, source.display(), arrow)
            }
            OperationStatus::Simulated => {
                println!("Would {}: {}{}", record.kind, source.display(), arrow)
            }
            OperationStatus::Skipped => println!(
                "⏭  {} {}: {}",
                record.kind,
                source.display(),
                record.error.as_deref().unwrap_or("skipped")
            ),
            OperationStatus::Failed => eprintln!(
                "❌ {}: {}",
                source.display(),
                record.error.as_deref().unwrap_or("failed")
            ),
        }
    }
}

fn print_undo_hint(result: &ActionResult) {
    if let Some(batch) = result.batch {
        if result.completed_count() > 0 {
            println!(
                "{} tidyfs undo --batch {}",
                style("↩️  To reverse this run:").dim(),
                batch
            );
        }
    }
}

fn print_undo_outcomes(batch: u64, outcomes: &[UndoOutcome]) {
    for outcome in outcomes {
        match outcome.status {
            UndoStatus::Undone => println!(
                "↩️  #{} {} {}",
                outcome.id,
                outcome.kind,
                outcome.source.display()
            ),
            UndoStatus::Simulated => println!(
                "Would undo #{} {} {}",
                outcome.id,
                outcome.kind,
                outcome.source.display()
            ),
            UndoStatus::Failed => eprintln!(
                "❌ #{} {}: {}",
                outcome.id,
                outcome.source.display(),
                outcome.error.as_deref().unwrap_or("failed")
            ),
        }
    }
    let failed = outcomes.iter().filter(|o| o.status == UndoStatus::Failed).count();
    println!(
        "{} batch {}: {} reversed, {} failed",
        style("📜 Undo").cyan().bold(),
        batch,
        outcomes.len() - failed,
        failed
    );
}

fn describe(op: &Operation) -> String {
    let state = if op.undone {
        style("undone").dim().to_string()
    } else if op.can_undo {
        style("undoable").green().to_string()
    } else {
        style("final").red().to_string()
    };
    let target = op
        .destination
        .as_ref()
        .or(op.backup.as_ref())
        .map(|d| format!(" -> {}", d.display()))
        .unwrap_or_default();
    let batch = op.batch.map(|b| format!(" (batch {})", b)).unwrap_or_default();
    format!(
        "#{:<4} {} {:<6} {}{} [{}]{}",
        op.id,
        op.timestamp.format("%Y-%m-%d %H:%M:%S"),
        op.kind.to_string(),
        op.source.display(),
        target,
        state,
        batch
    )
}
