//! CLI command definitions for the `atomflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod cache;
pub mod pipeline;
pub mod plan;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run the built-in text-analysis pipeline on the Atomflow engine.
#[derive(Parser)]
#[command(name = "atomflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logs on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration file.
    #[arg(long, global = true, env = "ATOMFLOW_CONFIG", default_value = "atomflow.toml")]
    pub config: PathBuf,

    /// Emit JSON logs instead of human-readable ones.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry. Spans are printed to
    /// stdout, so this cannot be combined with `--json`.
    #[arg(long, global = true, conflicts_with = "json")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute the pipeline over an input file, reusing cached results.
    Run {
        /// Text file to analyze.
        #[arg(short, long)]
        input: PathBuf,

        /// Force an atom and everything downstream of it to recompute.
        /// Repeatable.
        #[arg(short, long = "recompute", value_name = "ATOM")]
        recompute: Vec<String>,

        /// SQLite cache file. Persists results across runs; without it
        /// (and without a sqlite backend in the config) the cache lives
        /// in memory.
        #[arg(long, env = "ATOMFLOW_CACHE")]
        cache: Option<PathBuf>,

        /// Override `max_concurrency` from the config.
        #[arg(long)]
        max_concurrency: Option<usize>,
    },

    /// Print the pipeline's execution waves.
    Plan,

    /// Inspect or clear a SQLite cache.
    Cache {
        #[command(subcommand)]
        action: cache::CacheCommand,
    },
}
