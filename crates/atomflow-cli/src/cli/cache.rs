//! `atomflow cache`: inspect and clear a persistent cache.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Subcommand;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use atomflow_core::CacheStore;
use atomflow_infra::config::resolve_cache_path;
use atomflow_infra::sqlite::cache::SqliteCacheStore;
use atomflow_types::config::EngineConfig;

use super::run::open_sqlite_cache;

/// Cache maintenance subcommands.
#[derive(Subcommand)]
pub enum CacheCommand {
    /// Delete cached outcomes.
    Clear {
        /// Only delete entries produced by this atom.
        #[arg(long)]
        atom: Option<String>,

        /// SQLite cache file.
        #[arg(long, env = "ATOMFLOW_CACHE")]
        cache: Option<PathBuf>,
    },

    /// Show per-atom entry counts.
    Stats {
        /// SQLite cache file.
        #[arg(long, env = "ATOMFLOW_CACHE")]
        cache: Option<PathBuf>,
    },
}

/// Handle a cache subcommand.
pub async fn handle_cache_command(
    cmd: CacheCommand,
    config: &EngineConfig,
    json: bool,
) -> Result<()> {
    match cmd {
        CacheCommand::Clear { atom, cache } => {
            let store = open_store(config, cache).await?;
            cache_clear(&store, atom.as_deref(), json).await
        }
        CacheCommand::Stats { cache } => {
            let store = open_store(config, cache).await?;
            cache_stats(&store, json).await
        }
    }
}

async fn open_store(config: &EngineConfig, cache: Option<PathBuf>) -> Result<SqliteCacheStore> {
    let Some(path) = resolve_cache_path(config, cache.as_deref()) else {
        bail!("No persistent cache configured; pass --cache or set cache.backend = \"sqlite\"");
    };
    open_sqlite_cache(&path).await
}

async fn cache_clear(store: &SqliteCacheStore, atom: Option<&str>, json: bool) -> Result<()> {
    let removed = match atom {
        Some(atom) => store.remove_atom(atom).await?,
        None => {
            let count = store.len().await?;
            store.clear().await?;
            count as u64
        }
    };

    if json {
        let result = serde_json::json!({
            "removed": removed,
            "atom": atom,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!();
        match atom {
            Some(atom) => println!(
                "  {} Removed {} cached outcome(s) for '{}'",
                style("ok").green(),
                removed,
                style(atom).cyan(),
            ),
            None => println!(
                "  {} Removed {} cached outcome(s)",
                style("ok").green(),
                removed
            ),
        }
        println!();
    }

    Ok(())
}

async fn cache_stats(store: &SqliteCacheStore, json: bool) -> Result<()> {
    let stats = store.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    if stats.is_empty() {
        println!();
        println!("  {} Cache is empty", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Atom").fg(Color::Cyan),
            Cell::new("Entries").fg(Color::Cyan),
            Cell::new("Failures").fg(Color::Cyan),
            Cell::new("Last written").fg(Color::Cyan),
        ]);

    for entry in &stats {
        let failures = if entry.failures > 0 {
            Cell::new(entry.failures).fg(Color::Red)
        } else {
            Cell::new(entry.failures)
        };
        table.add_row(vec![
            Cell::new(&entry.atom),
            Cell::new(entry.entries),
            failures,
            Cell::new(entry.last_written.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}
