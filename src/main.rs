// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use regional_sync::{
    init_tracing, list_active_units, list_all_units, recent_events, unit_history, AppConfig,
    LogFormat, RegionalStore, Synchronizer,
};

#[derive(Parser, Debug)]
#[command(
    name = "regional-sync",
    version,
    about = "Mirror the authority's regional units into a local history-preserving store"
)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "REGIONAL_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Authority endpoint returning the full snapshot
    #[arg(long, global = true, conflicts_with = "source_file")]
    source_url: Option<String>,

    /// Snapshot file (.json or .csv) instead of the HTTP endpoint
    #[arg(long, global = true)]
    source_file: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation against the authority
    Sync,
    /// Fetch and diff only; print what a sync would change
    Plan,
    /// List active units
    List {
        /// Include retired versions
        #[arg(long, conflicts_with = "at")]
        all: bool,
        /// Show the units that were active at this RFC 3339 instant
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Show every version of one external id
    History { external_id: i64 },
    /// Show the most recent audit events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Terminal browser (default)
    Ui,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    init_tracing(&config.logging.level, config.logging.format)?;

    match cli.command.unwrap_or(Command::Ui) {
        Command::Sync => run_sync(&config),
        Command::Plan => run_plan(&config),
        Command::List { all, at } => run_list(&config, all, at),
        Command::History { external_id } => run_history(&config, external_id),
        Command::Events { limit } => run_events(&config, limit),
        Command::Ui => run_ui_mode(&config),
    }
}

/// Config file, then environment, then command-line flags
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(url) = &cli.source_url {
        config.source.url = Some(url.clone());
        config.source.file = None;
    }
    if let Some(file) = &cli.source_file {
        config.source.file = Some(file.clone());
        config.source.url = None;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_store(config: &AppConfig) -> Result<RegionalStore> {
    RegionalStore::open(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path.display()))
}

fn synchronizer(config: &AppConfig) -> Result<Synchronizer> {
    let store = open_store(config)?;
    let source = config.build_source().context("cannot build external source")?;
    Ok(Synchronizer::new(store, source, config.engine()))
}

fn run_sync(config: &AppConfig) -> Result<()> {
    println!("🔄 Regional Sync");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let sync = synchronizer(config)?;
    println!("📡 Source:   {}", sync.source_description());
    println!("🗄️  Database: {}", config.database_path.display());

    let report = sync.synchronize().context("synchronization failed")?;

    println!("\n✓ Snapshot: {} units (sha256 {})", report.snapshot_size, &report.snapshot_hash[..12]);
    println!("✓ Inserted:    {}", report.result.inserted);
    println!("✓ Updated:     {}", report.result.updated);
    println!("✓ Deactivated: {}", report.result.deactivated);
    println!("  Unchanged:   {}", report.unchanged);

    if report.duplicates_retired > 0 {
        println!("  Duplicate active rows retired: {}", report.duplicates_retired);
    }

    if !report.anomalies.is_empty() {
        println!("\n⚠️  Anomalies:");
        for anomaly in &report.anomalies {
            println!("   - {}", anomaly.describe());
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.result.is_noop() {
        println!("✅ Mirror already up to date (run {})", report.run_id);
    } else {
        println!("✅ Sync complete (run {})", report.run_id);
    }

    Ok(())
}

fn run_plan(config: &AppConfig) -> Result<()> {
    let sync = synchronizer(config)?;
    let preview = sync.preview().context("failed to compute plan")?;

    println!("📋 Plan against {} ({} units)", preview.source, preview.snapshot_size);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if preview.plan.is_empty() {
        println!("✓ Nothing to do: {} units unchanged", preview.plan.unchanged);
    } else {
        for mutation in &preview.plan.mutations {
            println!("  {}", mutation.describe());
        }
        println!("\n{} ({} unchanged)", preview.plan.result().summary(), preview.plan.unchanged);
        let duplicates = preview.plan.duplicates_retired();
        if duplicates > 0 {
            println!("  Duplicate active rows to retire: {}", duplicates);
        }
    }

    for anomaly in &preview.plan.anomalies {
        println!("⚠️  {}", anomaly.describe());
    }

    Ok(())
}

fn run_list(config: &AppConfig, all: bool, at: Option<DateTime<Utc>>) -> Result<()> {
    let store = open_store(config)?;
    let units = match at {
        Some(at) => list_all_units(store.connection())?
            .into_iter()
            .filter(|unit| unit.was_active_at(at))
            .collect(),
        None if all => list_all_units(store.connection())?,
        None => list_active_units(store.connection())?,
    };

    println!("{:>12}  {:<8}  {:>8}  NAME", "EXTERNAL_ID", "STATUS", "LOCAL");
    for unit in &units {
        let status = if unit.is_current() { "active" } else { "retired" };
        println!(
            "{:>12}  {:<8}  {:>8}  {}",
            unit.external_id, status, unit.local_id, unit.name
        );
    }
    println!("\n{} units", units.len());

    Ok(())
}

fn run_history(config: &AppConfig, external_id: i64) -> Result<()> {
    let store = open_store(config)?;
    let versions = unit_history(store.connection(), external_id)?;

    if versions.is_empty() {
        println!("No versions recorded for external id {}", external_id);
        return Ok(());
    }

    println!("🕰️  History of external id {}", external_id);
    for version in &versions {
        let until = version
            .retired_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "current".to_string());
        let marker = if version.active { "●" } else { "○" };
        println!(
            "  {} #{} \"{}\"  {} → {}",
            marker,
            version.local_id,
            version.name,
            version.created_at.to_rfc3339(),
            until
        );
    }

    Ok(())
}

fn run_events(config: &AppConfig, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let events = recent_events(store.connection(), limit)?;

    for event in &events {
        println!(
            "{}  {:<18} {}:{}  {}",
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            event.data
        );
    }
    println!("\n{} events", events.len());

    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &AppConfig) -> Result<()> {
    println!("🖥️  Loading Regional Sync browser...\n");

    if !config.database_path.exists() {
        eprintln!("❌ Database not found at {}", config.database_path.display());
        eprintln!("   Run: regional-sync sync");
        eprintln!("   to populate the mirror first.");
        std::process::exit(1);
    }

    let store = open_store(config)?;
    let units = list_all_units(store.connection())?;
    let events = recent_events(store.connection(), 500)?;

    println!("✓ Loaded {} unit versions", units.len());
    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(units, events);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &AppConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use: regional-sync list");
    std::process::exit(1);
}
