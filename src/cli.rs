// Sidecar Sync CLI binary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::{Args, Parser, Subcommand};
use anyhow::Result;

use sidecar_sync_lib::engine::{ApplyOutcome, RemovalOutcome};
use sidecar_sync_lib::matcher::MatchResult;
use sidecar_sync_lib::metadata::{ExifToolStore, MetadataStore};
use sidecar_sync_lib::tree::{FileTree, LocalFileTree};
use sidecar_sync_lib::{write_report, CancelToken, SyncConfig, SyncEngine};

#[derive(Parser)]
#[command(name = "sidecar-sync")]
#[command(about = "Sidecar Sync - merge exported sidecar metadata into a re-exported photo library", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunOptions {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Perceptual similarity threshold (0..=1)
    #[arg(long)]
    threshold: Option<f64>,
    /// Worker threads for hashing and writing
    #[arg(long)]
    workers: Option<usize>,
    /// Hash cache file
    #[arg(long, conflicts_with = "no_cache")]
    cache: Option<PathBuf>,
    /// Keep the hash cache in memory only
    #[arg(long)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Match source to target and write sidecar metadata into target files
    Sync {
        /// Export with JSON sidecars (never modified)
        #[arg(long)]
        source: PathBuf,
        /// Library whose files receive the metadata
        #[arg(long)]
        target: PathBuf,
        /// Decide everything, write nothing
        #[arg(long)]
        dry_run: bool,
        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,
        /// Match by names and content hashes only (faster, less thorough)
        #[arg(long)]
        no_perceptual: bool,
        #[command(flatten)]
        options: RunOptions,
    },

    /// List duplicate groups in one tree, optionally deleting non-keepers
    Dupes {
        /// Directory to scan
        #[arg(long)]
        dir: PathBuf,
        /// Delete every member except the keeper
        #[arg(long)]
        remove: bool,
        /// With --remove, also delete members that are only visually similar
        #[arg(long, requires = "remove")]
        include_similar: bool,
        /// With --remove, only show what would be deleted
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        options: RunOptions,
    },

    /// Show the fingerprint and embedded metadata of one file
    Inspect {
        /// File to inspect
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Commands::Sync { source, target, dry_run, report, no_perceptual, options } => {
            cmd_sync(source, target, dry_run, report, no_perceptual, options)
        }
        Commands::Dupes { dir, remove, include_similar, dry_run, options } => {
            cmd_dupes(dir, remove, include_similar, dry_run, options)
        }
        Commands::Inspect { file } => cmd_inspect(file),
    }
}

fn cmd_sync(
    source: PathBuf,
    target: PathBuf,
    dry_run: bool,
    report_path: Option<PathBuf>,
    no_perceptual: bool,
    options: RunOptions,
) -> Result<()> {
    if source == target {
        anyhow::bail!("Source and target must be different directories");
    }

    let mut config = load_config(&options)?;
    config.dry_run |= dry_run;
    if no_perceptual {
        config.perceptual_matching = false;
    }

    let engine = build_engine(config)?;
    cancel_on_interrupt(&engine);
    let report = engine.run(&source, &target)?;

    for result in &report.matches {
        if let MatchResult::Ambiguous { source, candidates } = result {
            println!("AMBIGUOUS  {} ({} candidates)", source.display(), candidates.len());
            for candidate in candidates {
                println!("           - {}", candidate.display());
            }
        }
    }
    for pair in &report.pairs {
        let label = match pair.outcome {
            ApplyOutcome::Written => "WRITTEN",
            ApplyOutcome::WouldWrite => "WOULD",
            ApplyOutcome::NothingToWrite => continue,
            ApplyOutcome::Failed => "FAILED",
            ApplyOutcome::NotApplied => "SKIPPED",
        };
        println!("{:<10} {} <- {}", label, pair.target.display(), pair.source.display());
    }

    let s = &report.summary;
    println!();
    println!("Sources:            {}", s.sources);
    println!("Targets:            {}", s.targets);
    println!("Matched:            {}", s.matched);
    println!("Ambiguous:          {}", s.ambiguous);
    println!("Unmatched sources:  {}", s.unmatched_sources);
    println!("Unmatched targets:  {}", s.unmatched_targets);
    if report.dry_run {
        println!("Would write:        {}", s.would_write);
    } else {
        println!("Written:            {}", s.written);
    }
    println!("Conflicts:          {}", s.conflicts);
    println!("Failures:           {}", s.failures);
    if report.cancelled {
        println!("Run was cancelled; re-run to finish.");
    }

    if let Some(path) = report_path {
        write_report(&path, &report)?;
        println!("Report: {}", path.display());
    }

    Ok(())
}

fn cmd_dupes(dir: PathBuf, remove: bool, include_similar: bool, dry_run: bool, options: RunOptions) -> Result<()> {
    let mut config = load_config(&options)?;
    config.dry_run |= dry_run;

    let engine = build_engine(config)?;
    cancel_on_interrupt(&engine);
    let groups = engine.find_duplicates(&dir)?;

    if groups.is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }

    for (i, group) in groups.iter().enumerate() {
        println!("Group {} ({:?}):", i + 1, group.reason);
        for member in &group.members {
            let marker = if *member == group.keeper { "keep" } else { "    " };
            println!("  [{}] {}", marker, member.display());
        }
    }
    println!();
    println!("{} group(s)", groups.len());

    if remove {
        let removals = engine.remove_duplicates(&groups, include_similar);
        println!();
        for removal in &removals {
            let label = match removal.outcome {
                RemovalOutcome::Removed => "REMOVED",
                RemovalOutcome::WouldRemove => "WOULD",
                RemovalOutcome::Skipped => "KEPT",
                RemovalOutcome::Failed => "FAILED",
                RemovalOutcome::NotApplied => "SKIPPED",
            };
            match &removal.reason {
                Some(reason) => println!("{:<10} {} ({})", label, removal.path.display(), reason),
                None => println!("{:<10} {}", label, removal.path.display()),
            }
        }
        let done = removals
            .iter()
            .filter(|r| matches!(r.outcome, RemovalOutcome::Removed | RemovalOutcome::WouldRemove))
            .count();
        if engine.is_dry_run() {
            println!("Would remove {} of {} duplicate file(s)", done, removals.len());
        } else {
            println!("Removed {} of {} duplicate file(s)", done, removals.len());
        }
    }
    Ok(())
}

fn cmd_inspect(file: PathBuf) -> Result<()> {
    if !file.is_file() {
        anyhow::bail!("Not a file: {}", file.display());
    }
    let config = SyncConfig { hash_cache_path: None, ..SyncConfig::default() };
    let engine = build_engine(config)?;
    let inspection = engine.inspect(&file);
    println!("{}", serde_json::to_string_pretty(&inspection)?);
    Ok(())
}

fn load_config(options: &RunOptions) -> Result<SyncConfig> {
    let mut config = match &options.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(threshold) = options.threshold {
        config.similarity_threshold = threshold;
    }
    if let Some(workers) = options.workers {
        config.workers = workers;
    }
    if let Some(cache) = &options.cache {
        config.hash_cache_path = Some(cache.clone());
    }
    if options.no_cache {
        config.hash_cache_path = None;
    }
    Ok(config)
}

/// First Ctrl-C lets files in flight finish and the run still reports and
/// saves the hash cache. A second one exits immediately.
fn cancel_on_interrupt(engine: &SyncEngine) {
    let cancel = engine.cancel_token();
    let installed = ctrlc::set_handler(move || {
        if handle_interrupt(&cancel) {
            std::process::exit(130);
        }
    });
    if let Err(e) = installed {
        log::warn!("Interrupt handling unavailable: {}", e);
    }
}

/// Returns true on the second interrupt, when the process should exit.
fn handle_interrupt(cancel: &CancelToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    log::warn!("Interrupt received; finishing files in flight (Ctrl-C again to abort)");
    cancel.cancel();
    false
}

fn build_engine(config: SyncConfig) -> Result<SyncEngine> {
    config.validate()?;
    let store: Arc<dyn MetadataStore> = Arc::new(ExifToolStore::new(Duration::from_secs(config.tool_timeout_secs))?);
    let tree: Arc<dyn FileTree> = Arc::new(LocalFileTree);
    Ok(SyncEngine::new(config, store, tree)?)
}
