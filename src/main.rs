//! mmpcollect CLI entry point

use anyhow::{Context, Result};
use mmpcollect::collect::{self, lock_path_for};
use mmpcollect::config::cli::{Cli, Command};
use mmpcollect::config::{toml::load_config, validator, Config};
use mmpcollect::lock::{FileMutex, OwnerToken};
use mmpcollect::output::{json, text, TableExporter};
use mmpcollect::stats;
use mmpcollect::store::{ConsolidatedStore, PartialResultStore};
use std::path::Path;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.log_level.as_deref())?;

    let config = if cli.needs_config() {
        load_config(&cli)?
    } else {
        Config::default()
    };

    match &cli.command {
        Command::Collect { .. } => run_collect(&config),
        Command::Record { files, .. } => run_record(&config, files),
        Command::Evaluate { .. } => run_evaluate(&config),
        Command::Inspect { file } => run_inspect(file),
        Command::Unlock { lock, token } => run_unlock(lock, token),
    }
}

/// Install the stderr log subscriber
fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log filter: {}", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// One-shot collection pass
fn run_collect(config: &Config) -> Result<()> {
    validator::validate_collect(&config.collect)
        .context("Configuration validation failed")?;

    let start = Instant::now();
    let (store, summary) = collect::collect(&config.collect.root, &config.collect.plan())
        .with_context(|| format!("Failed to collect from {}", config.collect.root.display()))?;
    store
        .save(&config.collect.store)
        .with_context(|| format!("Failed to save store: {}", config.collect.store.display()))?;

    text::print_collection(&summary);
    println!("Store written: {}", config.collect.store.display());
    info!(elapsed_sec = start.elapsed().as_secs_f64(), "collect finished");
    Ok(())
}

/// Late/rerun merge under the store lock
fn run_record(config: &Config, files: &[std::path::PathBuf]) -> Result<()> {
    validator::validate_collect(&config.collect)
        .context("Configuration validation failed")?;

    let store_path = &config.collect.store;
    info!(lock = %lock_path_for(store_path).display(), "waiting for store lock");
    let summary = collect::record_late_results(store_path, &config.collect.plan(), files)
        .with_context(|| format!("Failed to record results into {}", store_path.display()))?;

    text::print_collection(&summary);
    Ok(())
}

/// Filter, reduce, check and export each evaluation set
fn run_evaluate(config: &Config) -> Result<()> {
    validator::validate_evaluate(config).context("Configuration validation failed")?;

    let store = ConsolidatedStore::load(&config.collect.store)
        .with_context(|| format!("Failed to load store: {}", config.collect.store.display()))?;

    let settings = config.evaluate.settings();
    let mut evaluations = Vec::new();
    for set in config.evaluation_sets() {
        let evaluation = stats::evaluate(&store, &set.algorithms, &settings)
            .with_context(|| format!("Evaluation of {} failed", set.label()))?;

        if let Some(ref prefix) = config.evaluate.output_prefix {
            let prefix = set.table_prefix(prefix);
            let written = TableExporter::new()
                .export(&evaluation, &prefix)
                .with_context(|| format!("Failed to export tables to {}", prefix.display()))?;
            for path in written {
                info!(set = set.label(), table = %path.display(), "table written");
            }
        }

        text::print_evaluation(set.label(), &evaluation);
        evaluations.push((set.label().to_string(), evaluation));
    }

    if let Some(ref path) = config.evaluate.json_output {
        json::write_evaluations(path, &evaluations, &settings)?;
        info!(file = %path.display(), "JSON evaluation written");
    }

    Ok(())
}

/// Print the header and algorithm index of one partial-result file
fn run_inspect(file: &Path) -> Result<()> {
    let partial = PartialResultStore::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let header = partial.header();

    println!("File:      {}", file.display());
    println!("Dimension: {}", header.dimension);
    println!("Channel:   {}", header.channel_index);
    println!("Written:   {}", header.written_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Algorithms:");
    for name in partial.algorithm_names() {
        match partial.record(name) {
            Ok(Some(record)) => println!(
                "  {:<16} runtime {:>10}  memory {:>12.0} B  iterations {:>5} ({} incomplete)  payload {} B",
                name,
                text::format_seconds(record.runtime as f64),
                record.memory_bytes(),
                record.iteration_count(),
                record.missing_iterations(),
                record.payload.len(),
            ),
            Ok(None) => {}
            Err(e) => println!("  {:<16} unreadable: {}", name, e),
        }
    }
    Ok(())
}

/// Release a marker left by a known owner
fn run_unlock(lock: &Path, token: &str) -> Result<()> {
    let mutex = FileMutex::with_token(lock, OwnerToken::from(token));
    let released = mutex
        .release()
        .with_context(|| format!("Failed to release {}", lock.display()))?;

    if released {
        println!("Released {}", lock.display());
        Ok(())
    } else {
        let owner = mutex.owner()?.map(|t| t.to_string()).unwrap_or_default();
        anyhow::bail!("{} is held by {}, not {}", lock.display(), owner, token)
    }
}
