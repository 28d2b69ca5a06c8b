//! `atomflow run`: execute the pipeline and print the report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use tokio_util::sync::CancellationToken;

use atomflow_core::{CacheStore, ExecutionReport, MemoryCacheStore, WorkflowEngine};
use atomflow_infra::config::resolve_cache_path;
use atomflow_infra::crypto::hash::Sha256ContentHasher;
use atomflow_infra::sqlite::cache::SqliteCacheStore;
use atomflow_infra::sqlite::pool::DatabasePool;
use atomflow_types::atom::{AtomResult, AtomStatus};
use atomflow_types::config::EngineConfig;

use super::pipeline::register_pipeline;

/// Longest value preview shown in the table.
const PREVIEW_CHARS: usize = 48;

/// Options collected from the `run` subcommand.
pub struct RunOptions {
    pub input: PathBuf,
    pub recompute: Vec<String>,
    pub cache: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
}

/// Run the pipeline against the configured cache backend.
pub async fn run(config: EngineConfig, options: RunOptions, json: bool) -> Result<()> {
    let mut config = config;
    if let Some(max) = options.max_concurrency {
        config.max_concurrency = max;
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling execution");
            ctrl_c.cancel();
        }
    });

    let report = match resolve_cache_path(&config, options.cache.as_deref()) {
        Some(path) => {
            let store = open_sqlite_cache(&path).await?;
            run_with(store, config, &options, &cancel).await?
        }
        None => run_with(MemoryCacheStore::new(), config, &options, &cancel).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_success() {
        let failed = report.len() - report.count(AtomStatus::Succeeded) - successful_hits(&report);
        bail!("{failed} atom(s) did not produce a value");
    }

    Ok(())
}

/// Open (and migrate) the SQLite cache at `path`.
pub async fn open_sqlite_cache(path: &Path) -> Result<SqliteCacheStore> {
    let pool = DatabasePool::open(path)
        .await
        .with_context(|| format!("Failed to open cache database at {}", path.display()))?;
    Ok(SqliteCacheStore::new(pool))
}

async fn run_with<C: CacheStore + 'static>(
    store: C,
    config: EngineConfig,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<ExecutionReport> {
    let mut engine = WorkflowEngine::new(Arc::new(store), Arc::new(Sha256ContentHasher::new()))
        .with_config(config)?;
    register_pipeline(&mut engine, options.input.clone())?;

    let recompute: Vec<&str> = options.recompute.iter().map(String::as_str).collect();
    let report = engine.execute_with_cancel(&recompute, cancel.clone()).await?;
    Ok(report)
}

fn successful_hits(report: &ExecutionReport) -> usize {
    report
        .iter()
        .filter(|(_, r)| r.status == AtomStatus::CacheHit && r.is_success())
        .count()
}

fn print_report(report: &ExecutionReport) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Atom").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Attempts").fg(Color::Cyan),
            Cell::new("Duration").fg(Color::Cyan),
            Cell::new("Fingerprint").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    for (name, result) in report.iter() {
        let fingerprint = result
            .fingerprint
            .as_deref()
            .map(|fp| fp.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(name),
            status_cell(result),
            Cell::new(result.attempts),
            Cell::new(format!("{}ms", result.duration_ms)),
            Cell::new(fingerprint),
            Cell::new(preview(result)),
        ]);
    }

    println!();
    println!(
        "  {} Execution {}",
        style("▶").bold(),
        style(report.execution_id()).dim()
    );
    println!("{table}");
    println!(
        "  {} executed, {} cached, {} failed, {} skipped",
        style(report.count(AtomStatus::Succeeded) + report.count(AtomStatus::Failed)).bold(),
        style(report.count(AtomStatus::CacheHit)).green(),
        style(report.count(AtomStatus::Failed)).red(),
        style(report.count(AtomStatus::Skipped)).yellow(),
    );
    if report.count(AtomStatus::Cancelled) > 0 {
        println!(
            "  {} {} atom(s) cancelled",
            style("!").yellow().bold(),
            report.count(AtomStatus::Cancelled)
        );
    }
    println!();
}

fn status_cell(result: &AtomResult) -> Cell {
    let color = match result.status {
        AtomStatus::Succeeded => Color::Green,
        AtomStatus::CacheHit if result.is_success() => Color::Blue,
        AtomStatus::CacheHit | AtomStatus::Failed => Color::Red,
        AtomStatus::Skipped | AtomStatus::Cancelled => Color::Yellow,
    };
    Cell::new(result.status).fg(color)
}

/// One-line preview of a value or error, truncated to [`PREVIEW_CHARS`].
fn preview(result: &AtomResult) -> String {
    let text = match &result.outcome {
        Ok(value) => value.to_string(),
        Err(err) => err.to_string(),
    };
    if text.chars().count() <= PREVIEW_CHARS {
        text
    } else {
        let head: String = text.chars().take(PREVIEW_CHARS - 3).collect();
        format!("{head}...")
    }
}
