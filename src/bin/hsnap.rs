//! # hsnap - content-addressed snapshots from the command line
//!
//! Snapshot a directory, inspect snapshots and trim files already present
//! in a backup.
//!
//! ## Usage
//! ```bash
//! # Snapshot the current directory into ./.hsnap
//! hsnap create --progress
//!
//! # Totals of the governing snapshot, or of explicit files
//! hsnap info
//! hsnap info /mnt/backup/.hsnap
//!
//! # Duplicated content inside the current snapshot
//! hsnap dedup
//!
//! # What would go if /mnt/backup is trusted, then do it
//! hsnap trim /mnt/backup/.hsnap
//! hsnap trim --delete /mnt/backup/.hsnap
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use colored::*;
use hashsnap::snapshot::DEFAULT_STATE_NAME;
use hashsnap::trim::TrimGroup;
use hashsnap::utils::format_bytes;
use hashsnap::{
    duplicates_within, lookup_from, read_tree, summarize, unique_files, CancelToken, FileStore,
    HashsnapError, NoProgress, Node, ProgressSink, RemovalOutcome, Reporter, SnapshotBuilder,
    SnapshotOptions, SnapshotStore, Tree, TrimOutcome, TrimPlanner,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// hsnap - snapshot directories and trim what is already backed up
#[derive(Parser)]
#[command(name = "hsnap")]
#[command(version)]
#[command(about = "A snapshot manipulator to ease deduplication across filesystems")]
#[command(long_about = None)]
struct Cli {
    /// Working directory (defaults to current)
    #[arg(long, global = true)]
    wd: Option<PathBuf>,

    /// Snapshot file (defaults to the closest .hsnap in the working directory or above)
    #[arg(long, global = true)]
    hsnap: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot the working directory
    Create {
        /// Show hashing progress
        #[arg(long)]
        progress: bool,

        /// JSON file with snapshot options
        #[arg(long)]
        config: Option<PathBuf>,

        /// Additional entry names to exclude
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Glob patterns of entry names to exclude
        #[arg(short, long)]
        pattern: Vec<String>,

        /// Number of hashing threads
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show totals of one or more snapshots
    Info {
        /// Snapshot files (defaults to the governing snapshot)
        files: Vec<PathBuf>,
    },

    /// List the nodes of a snapshot
    Ls {
        /// Path inside the snapshot, relative to its root
        path: Option<PathBuf>,
    },

    /// List recorded files that are gone from disk
    Check,

    /// Show duplicated content inside the snapshot
    Dedup {
        /// Show at most this many groups
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List files of the snapshot found in none of the given snapshots
    Diff {
        /// Snapshots to compare against
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Find (and optionally remove) files already present in reference snapshots
    Trim {
        /// Actually remove the files
        #[arg(long)]
        delete: bool,

        /// Only print the summary
        #[arg(short, long)]
        quiet: bool,

        /// Reference snapshots
        #[arg(required = true)]
        references: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<HashsnapError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let wd = match cli.wd {
        Some(wd) => fs::canonicalize(&wd).with_context(|| format!("cannot open {}", wd.display()))?,
        None => std::env::current_dir().context("cannot read current directory")?,
    };
    let ws = Workspace { wd, hsnap: cli.hsnap };

    match cli.command {
        Commands::Create {
            progress,
            config,
            exclude,
            pattern,
            workers,
        } => cmd_create(&ws, progress, config, exclude, pattern, workers),
        Commands::Info { files } => cmd_info(&ws, files),
        Commands::Ls { path } => cmd_ls(&ws, path),
        Commands::Check => cmd_check(&ws),
        Commands::Dedup { limit } => cmd_dedup(&ws, limit),
        Commands::Diff { files } => cmd_diff(&ws, files),
        Commands::Trim {
            delete,
            quiet,
            references,
        } => cmd_trim(&ws, delete, quiet, references),
    }
}

/// Global flags shared by every command
struct Workspace {
    wd: PathBuf,
    hsnap: Option<PathBuf>,
}

impl Workspace {
    /// Snapshot governing the working directory
    fn governing(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.hsnap {
            return Ok(path.clone());
        }
        lookup_from(&self.wd, DEFAULT_STATE_NAME)?.ok_or_else(|| {
            anyhow!(
                "no snapshot found in {} or its parents, run 'hsnap create' first",
                self.wd.display()
            )
        })
    }

    /// Tree of the governing snapshot
    fn current_tree(&self) -> anyhow::Result<Tree> {
        open_tree(&self.governing()?)
    }
}

fn open_tree(path: &Path) -> anyhow::Result<Tree> {
    read_tree(&FileStore::new(path)).with_context(|| format!("cannot read {}", path.display()))
}

/// Snapshot the working directory
///
/// Refuses to run when a snapshot already governs the directory, an
/// inner snapshot would only duplicate part of the outer one.
fn cmd_create(
    ws: &Workspace,
    show_progress: bool,
    config: Option<PathBuf>,
    exclude: Vec<String>,
    pattern: Vec<String>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let mut options = match config {
        Some(path) => {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            SnapshotOptions::from_json(&json)?
        }
        None => SnapshotOptions::default(),
    };
    options.exclude_names.extend(exclude);
    options.exclude_patterns.extend(pattern);

    let output = match &ws.hsnap {
        Some(path) => path.clone(),
        None => {
            if let Some(existing) = lookup_from(&ws.wd, &options.state_name)? {
                return Err(HashsnapError::SnapshotExists(existing).into());
            }
            ws.wd.join(&options.state_name)
        }
    };

    let mut builder = SnapshotBuilder::new().options(options);
    if let Some(count) = workers {
        builder = builder.workers(count);
    }
    let snapshotter = builder.build(ws.wd.clone())?;

    println!(
        "{} {}",
        "Snapshotting".blue().bold(),
        ws.wd.display().to_string().cyan()
    );

    let progress = if show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {bytes} hashed ({binary_bytes_per_sec}) {elapsed}")?,
        );
        Some(pb)
    } else {
        None
    };
    let sink: &dyn ProgressSink = match &progress {
        Some(pb) => pb,
        None => &NoProgress,
    };

    let start = Instant::now();
    let mut store = FileStore::new(&output);
    let summary = snapshotter.create(&mut store, sink, &CancelToken::new())?;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    println!("{} Created {}", "✓".green().bold(), output.display().to_string().yellow());
    println!("  Directories: {}", summary.directories.to_string().cyan());
    println!("  Files: {}", summary.files.to_string().cyan());
    println!("  Size: {}", format_bytes(summary.total_size).cyan());
    println!("  Time: {}", format_duration(start.elapsed()).to_string().cyan());
    Ok(())
}

/// Show header and totals without building trees
fn cmd_info(ws: &Workspace, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let files = if files.is_empty() {
        vec![ws.governing()?]
    } else {
        files
    };

    for path in files {
        let store = FileStore::new(&path);
        let header = store
            .read_header()
            .with_context(|| format!("cannot read {}", path.display()))?;
        let summary = summarize(&store)?;

        println!("{}", path.display().to_string().blue().bold());
        println!("  Snapshot of: {}", header.root_path.display().to_string().cyan());
        println!("  Host: {}", header.hostname.cyan());
        println!(
            "  Created: {}",
            header.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
        );
        println!("  Nonce: {}", header.nonce.to_string().dimmed());
        println!(
            "  Totalling {} in {} files",
            format_bytes(summary.total_size).cyan(),
            summary.files.to_string().cyan()
        );
    }
    Ok(())
}

/// List a subtree, directories before their content
fn cmd_ls(ws: &Workspace, path: Option<PathBuf>) -> anyhow::Result<()> {
    let tree = ws.current_tree()?;
    let rel = path.unwrap_or_default();
    let start = tree
        .search(&rel)
        .ok_or_else(|| anyhow!("{} is not in the snapshot", rel.display()))?;

    println!(
        "Snapshot captured in {}",
        tree.header().root_path.display().to_string().cyan()
    );

    let mut count = 0usize;
    let mut stack = vec![start];
    while let Some(node) = stack.pop() {
        print_node(&tree, node)?;
        count += 1;
        let mut children: Vec<&Node> = tree.children_of(node.id).collect();
        children.sort_by(|a, b| b.name.cmp(&a.name));
        stack.extend(children);
    }
    println!("{}", format!("Listed {} nodes", count).dimmed());
    Ok(())
}

fn print_node(tree: &Tree, node: &Node) -> anyhow::Result<()> {
    let path = tree.rel_path(node.id)?;
    if node.is_dir {
        println!("{:>10}  {}  {}/", "", " ".repeat(8), path.display().to_string().blue());
    } else {
        println!(
            "{:>10}  {}  {}",
            format_bytes(node.size),
            node.hash.short().dimmed(),
            path.display()
        );
    }
    Ok(())
}

/// Files recorded in the snapshot but gone from disk
fn cmd_check(ws: &Workspace) -> anyhow::Result<()> {
    let tree = ws.current_tree()?;
    let missing = tree.missing_files();

    if missing.is_empty() {
        println!("{} All {} files present", "✓".green().bold(), tree.file_count());
        return Ok(());
    }

    println!("{}", "Missing files:".yellow().bold());
    for node in &missing {
        println!("  {}", tree.rel_path(node.id)?.display().to_string().red());
    }
    println!(
        "\n{} of {} files missing",
        missing.len().to_string().yellow(),
        tree.file_count()
    );
    Ok(())
}

/// Duplicated content inside the governing snapshot
fn cmd_dedup(ws: &Workspace, limit: Option<usize>) -> anyhow::Result<()> {
    let tree = ws.current_tree()?;
    let groups = duplicates_within(&tree)?;

    let shown = limit.unwrap_or(groups.len()).min(groups.len());
    for group in groups.iter().take(shown) {
        println!(
            "{} {} x{} ({} wasted)",
            group.hash().short().yellow(),
            format_bytes(group.size()),
            group.len(),
            format_bytes(group.wasted()).red()
        );
        for member in group.members() {
            println!("    {}", member.rel_path()?.display());
        }
    }

    let wasted = groups.iter().map(|g| g.wasted()).fold(0, u64::saturating_add);
    println!(
        "{} duplicated groups, totalling {} wasted space",
        groups.len().to_string().cyan(),
        format_bytes(wasted).cyan()
    );
    Ok(())
}

/// Files of the governing snapshot absent from every other snapshot
fn cmd_diff(ws: &Workspace, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let tree = ws.current_tree()?;
    let others = files
        .iter()
        .map(|path| open_tree(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let others: Vec<&Tree> = others.iter().collect();

    let unique = unique_files(&tree, &others)?;
    for node in &unique {
        println!("{}", tree.rel_path(node.id)?.display());
    }
    let size = unique.iter().map(|n| n.size).fold(0, u64::saturating_add);
    println!(
        "{}",
        format!("{} files ({}) found nowhere else", unique.len(), format_bytes(size)).dimmed()
    );
    Ok(())
}

/// Compare the governing snapshot against references and trim it
fn cmd_trim(
    ws: &Workspace,
    delete: bool,
    quiet: bool,
    references: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let current = ws.current_tree()?;
    let references = references
        .iter()
        .map(|path| open_tree(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let plan = TrimPlanner::new(&current).references(&references).plan()?;
    for (nonce, count) in plan.pruned() {
        if *count > 0 {
            tracing::debug!("{} single-snapshot groups pruned from {}", count, nonce);
        }
    }

    let mut reporter = ConsoleReporter { quiet, delete };
    if delete {
        plan.execute(&mut reporter);
    } else {
        plan.report(&mut reporter);
    }
    Ok(())
}

/// Prints trim groups and removals
struct ConsoleReporter {
    quiet: bool,
    delete: bool,
}

impl Reporter for ConsoleReporter {
    fn group(&mut self, group: &TrimGroup<'_>) {
        if self.quiet {
            return;
        }
        println!(
            "{} {} x{}",
            group.hash().short().yellow(),
            format_bytes(group.size()),
            group.candidates().len()
        );
        for member in group.evidence() {
            if let Ok(path) = member.abs_path() {
                println!("    {} {}", "=".green(), path.display().to_string().dimmed());
            }
        }
        if !self.delete {
            for member in group.candidates() {
                if let Ok(path) = member.rel_path() {
                    println!("    {} {}", "-".red(), path.display());
                }
            }
        }
    }

    fn removal(&mut self, outcome: &RemovalOutcome<'_>) {
        match outcome {
            RemovalOutcome::Removed { path, .. } => {
                if !self.quiet {
                    println!("    {} {}", "✓".green(), path.display());
                }
            }
            RemovalOutcome::Failed { node, path, error } => {
                let shown = match path {
                    Some(path) => path.display().to_string(),
                    None => node.name.clone(),
                };
                eprintln!("    {} {}: {}", "✗".red().bold(), shown, error);
            }
        }
    }

    fn finished(&mut self, outcome: &TrimOutcome) {
        if self.delete {
            println!(
                "{} Removed {} files, freed {}",
                "✓".green().bold(),
                outcome.removed.to_string().cyan(),
                format_bytes(outcome.freed).cyan()
            );
            if outcome.failed > 0 {
                println!("  {} files could not be removed", outcome.failed.to_string().red());
            }
        } else {
            println!(
                "{} groups, {} could be freed. Run with {} to remove them.",
                outcome.groups.to_string().cyan(),
                format_bytes(outcome.wasted).cyan(),
                "--delete".yellow()
            );
        }
    }
}
