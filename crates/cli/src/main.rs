//! Asset Index CLI
//!
//! Thin host around the indexing engine: builds the indexes for a project root and prints
//! query results, or streams live index events while watching.
//!
//! ## Commands
//!
//! - `scan` - Index the project and print a summary (or `--json` asset list)
//! - `groups` - Assets grouped by directory
//! - `search <query>` - Case-insensitive match over asset names and paths
//! - `importers <asset>` - Source locations referencing an asset
//! - `duplicates` - Groups of byte-identical assets
//! - `watch` - Keep the indexes live and print every change as a JSON line

use anyhow::{Context, Result};
use asset_index::{AssetIndexConfig, IndexCoordinator};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "asset-index", version, about = "Incremental asset indexing for web projects")]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to <root>/asset-index.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the project and print a summary
    Scan {
        /// Print the full asset list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Assets grouped by directory
    Groups,
    /// Search assets by name or path
    Search { query: String },
    /// Source locations referencing an asset
    Importers { asset: String },
    /// Groups of byte-identical assets
    Duplicates,
    /// Watch the project and print index events until Ctrl-C
    Watch,
}

#[derive(Serialize)]
struct DuplicatesOutput {
    stats: asset_index::DuplicateStats,
    groups: Vec<asset_index::DuplicateGroup>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .filter_module("notify", log::LevelFilter::Warn)
        .init();

    let config = match &cli.config {
        Some(path) => AssetIndexConfig::load_file(path, &cli.root)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AssetIndexConfig::load(&cli.root).context("failed to load config")?,
    };

    run(cli.command, config).await
}

async fn run(command: Command, mut config: AssetIndexConfig) -> Result<()> {
    if matches!(command, Command::Watch) {
        config.watch = true;
    }
    let coordinator = IndexCoordinator::new(config).context("failed to build indexes")?;
    coordinator
        .init()
        .await
        .with_context(|| format!("failed to index {}", coordinator.config().root.display()))?;

    match command {
        Command::Scan { json: true } => print_json(&coordinator.catalog().get_assets())?,
        Command::Scan { json: false } => print_summary(&coordinator),
        Command::Groups => print_json(&coordinator.catalog().get_grouped_assets())?,
        Command::Search { query } => print_json(&coordinator.catalog().search(&query))?,
        Command::Importers { asset } => {
            let asset = asset.trim_start_matches("./").replace('\\', "/");
            print_json(&coordinator.imports().get_importers(&asset))?;
        }
        Command::Duplicates => {
            let duplicates = coordinator.duplicates();
            print_json(&DuplicatesOutput {
                stats: duplicates.get_stats(),
                groups: duplicates.get_duplicate_groups(),
            })?;
        }
        Command::Watch => watch(&coordinator).await?,
    }

    coordinator.destroy();
    Ok(())
}

async fn watch(coordinator: &IndexCoordinator) -> Result<()> {
    coordinator
        .setup_watchers(|event| match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(err) => log::warn!("Failed to encode {} event: {err}", event.name()),
        })
        .context("failed to start watcher")?;

    log::info!(
        "Watching {} (Ctrl-C to stop)",
        coordinator.config().root.display()
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    log::info!("Stopping watcher");
    Ok(())
}

fn print_summary(coordinator: &IndexCoordinator) {
    let catalog = coordinator.catalog().stats();
    let imports = coordinator.imports().stats();
    let duplicates = coordinator.duplicates().get_stats();

    println!("Root: {}", coordinator.config().root.display());
    println!(
        "Assets: {} ({} bytes)",
        catalog.total_assets, catalog.total_size
    );
    for (asset_type, count) in &catalog.by_type {
        println!("  {:<9} {count}", asset_type.as_str());
    }
    println!(
        "References: {} from {} source files to {} assets",
        imports.references, imports.source_files, imports.referenced_assets
    );
    println!(
        "Duplicates: {} groups, {} files",
        duplicates.duplicate_groups, duplicates.duplicate_files
    );
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
