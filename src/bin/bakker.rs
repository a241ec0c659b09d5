//! # Bakker CLI - Deduplicating directory backups
//!
//! A command-line interface for the Bakker backup library.
//!
//! ## Usage
//! ```bash
//! # Back up a directory (storage is created on first use)
//! bakker --storage /mnt/backups backup ./project --name nightly
//!
//! # List stored checkpoints, oldest first
//! bakker list
//!
//! # Restore a checkpoint into a directory
//! bakker restore <checkpoint-id> ./restored
//!
//! # Inspect a checkpoint
//! bakker show <checkpoint-id>
//! ```
//!
//! The storage directory defaults to `.bakker` and can also be set with
//! the `BAKKER_STORAGE` environment variable.

use bakker::{
    utils::format_bytes, BakkerError, Checkpoint, CheckpointMeta, FileSystemStorage, Result,
    StorageConfig, TreeNode,
};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Bakker CLI - Deduplicating backups of directory trees
#[derive(Parser)]
#[command(name = "bakker")]
#[command(version)]
#[command(about = "Back up directory trees into deduplicated, content-addressed storage")]
#[command(long_about = None)]
struct Cli {
    /// Storage directory
    #[arg(short, long, global = true, env = "BAKKER_STORAGE", default_value = ".bakker")]
    storage: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a directory and store it
    Backup {
        /// Directory to back up
        path: PathBuf,

        /// Checkpoint name (letters, digits, '_', '.', '-')
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List stored checkpoints
    List,

    /// Restore a checkpoint into a directory
    Restore {
        /// Checkpoint ID
        checkpoint: String,

        /// Destination directory
        destination: PathBuf,
    },

    /// Show the contents of a checkpoint
    Show {
        /// Checkpoint ID
        checkpoint: String,
    },

    /// Show storage statistics
    Stats,
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
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Backup { path, name } => cmd_backup(&cli.storage, &path, name.as_deref()),
        Commands::List => cmd_list(&cli.storage),
        Commands::Restore { checkpoint, destination } => {
            cmd_restore(&cli.storage, &checkpoint, &destination)
        }
        Commands::Show { checkpoint } => cmd_show(&cli.storage, &checkpoint),
        Commands::Stats => cmd_stats(&cli.storage),
    }
}

/// Capture `path` and store it, initializing the storage if needed
fn cmd_backup(storage_path: &Path, path: &Path, name: Option<&str>) -> Result<()> {
    if !path.is_dir() {
        return Err(BakkerError::internal(format!("{} is not a directory", path.display())));
    }

    let storage = FileSystemStorage::init_or_open(storage_path, StorageConfig::default())?;
    println!("{}", "Creating backup...".blue().bold());

    let start = Instant::now();
    let checkpoint = Checkpoint::build_checkpoint_with(path, name, None, &storage.build_options())?;
    let report = storage.store(path, &checkpoint)?;
    let summary = checkpoint.summary();

    println!("{} Stored checkpoint {}", "✓".green().bold(), report.checkpoint_id.yellow().bold());
    println!(
        "  Entries: {} files, {} symlinks, {} directories",
        summary.files.to_string().cyan(),
        summary.symlinks.to_string().cyan(),
        summary.directories.to_string().cyan()
    );
    println!(
        "  Blobs: {} new, {} reused",
        report.blobs_written.to_string().cyan(),
        report.blobs_reused.to_string().dimmed()
    );
    println!("  Written: {}", format_bytes(report.bytes_written).cyan());
    println!("  Time: {}", format_duration(round_millis(start.elapsed())).to_string().cyan());

    Ok(())
}

/// List checkpoints in capture-time order
///
/// Catalog keys that don't decode as identifiers are listed last.
fn cmd_list(storage_path: &Path) -> Result<()> {
    let storage = open_storage(storage_path)?;
    let ids = storage.retrieve_checkpoint_ids()?;

    if ids.is_empty() {
        println!("{}", "No checkpoints found.".yellow());
        return Ok(());
    }

    let mut entries: Vec<(Option<CheckpointMeta>, String)> = ids
        .into_iter()
        .map(|id| (CheckpointMeta::parse(&id).ok(), id))
        .collect();
    entries.sort_by(|(a, a_id), (b, b_id)| match (a, b) {
        (Some(a), Some(b)) => a.time.cmp(&b.time).then_with(|| a_id.cmp(b_id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a_id.cmp(b_id),
    });

    println!("{}", "Checkpoints:".blue().bold());
    println!();

    for (meta, id) in &entries {
        match meta {
            Some(meta) => {
                print!("  {} ", meta.checksum.to_string().yellow().bold());
                print!("{} ", meta.time.format("%Y-%m-%d %H:%M:%S").to_string().dimmed());
                if let Some(name) = meta.name() {
                    print!("{}", name.cyan());
                }
                println!();
            }
            None => println!("  {} {}", id.red(), "(unrecognized id)".dimmed()),
        }
    }

    println!("\n{}", format!("{} checkpoints", entries.len()).dimmed());
    Ok(())
}

/// Restore a checkpoint into `destination`
fn cmd_restore(storage_path: &Path, checkpoint_id: &str, destination: &Path) -> Result<()> {
    let storage = open_storage(storage_path)?;

    println!(
        "{} {}",
        "Restoring checkpoint".blue().bold(),
        checkpoint_id.yellow()
    );

    let result = storage.retrieve(destination, checkpoint_id)?;

    println!("{} Restoration complete", "✓".green().bold());
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    println!("  Symlinks restored: {}", result.symlinks_restored.to_string().cyan());
    println!("  Directories restored: {}", result.directories_restored.to_string().cyan());
    println!("  Bytes written: {}", format_bytes(result.bytes_written).cyan());
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );

    Ok(())
}

/// Show checkpoint details and its tree
fn cmd_show(storage_path: &Path, checkpoint_id: &str) -> Result<()> {
    let storage = open_storage(storage_path)?;
    let checkpoint = storage.load_checkpoint(checkpoint_id)?;
    let summary = checkpoint.summary();

    println!("{} {}", "Checkpoint".blue().bold(), checkpoint_id.yellow().bold());
    println!();
    println!("  Checksum: {}", checkpoint.root().checksum().to_string().cyan());
    println!("  Captured: {}", checkpoint.time().format("%Y-%m-%d %H:%M:%S%.6f"));
    if let Some(name) = checkpoint.name() {
        println!("  Name: {}", name.cyan());
    }
    println!(
        "  Entries: {} files, {} symlinks, {} directories",
        summary.files, summary.symlinks, summary.directories
    );

    println!("\n{}", "Contents:".bold());
    for (node, path) in checkpoint.iter() {
        if path.as_os_str().is_empty() {
            continue;
        }
        let label = match node {
            TreeNode::Directory(_) => format!("{}/", path.display()).blue(),
            TreeNode::Symlink(_) => path.display().to_string().cyan(),
            TreeNode::File(_) => path.display().to_string().normal(),
        };
        println!(
            "  {:04o} {} {}",
            node.permissions(),
            node.checksum().to_string().dimmed(),
            label
        );
    }

    Ok(())
}

/// Show storage statistics
fn cmd_stats(storage_path: &Path) -> Result<()> {
    let storage = open_storage(storage_path)?;
    let stats = storage.stats()?;
    let metadata = storage.metadata();

    println!("{}", "Storage Statistics:".blue().bold());
    println!();
    println!("  Location: {}", storage.root().display().to_string().cyan());
    println!("  Created: {}", metadata.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Format version: {}", metadata.format_version);
    println!("  Checkpoints: {}", stats.checkpoint_count.to_string().cyan());
    println!("  Blobs: {}", stats.blob_count.to_string().cyan());
    println!("  Blob size: {}", format_bytes(stats.blob_bytes).cyan());

    Ok(())
}

/// Open existing storage
fn open_storage(storage_path: &Path) -> Result<FileSystemStorage> {
    FileSystemStorage::open(storage_path)
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
