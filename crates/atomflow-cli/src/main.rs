//! Atomflow CLI entry point.
//!
//! Binary name: `atomflow`
//!
//! Parses CLI arguments, sets up tracing, loads the engine configuration,
//! then dispatches to the appropriate command handler.

mod cli;

use clap::Parser;

use atomflow_infra::config::load_engine_config;
use atomflow_observe::tracing_setup::{init_tracing, shutdown_tracing, LogFormat, TracingOptions};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions {
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        enable_otel: cli.otel,
        verbose: cli.verbose,
    };
    if let Err(e) = init_tracing(&options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let config = load_engine_config(&cli.config).await;

    let result = match cli.command {
        Commands::Run {
            input,
            recompute,
            cache,
            max_concurrency,
        } => {
            let options = cli::run::RunOptions {
                input,
                recompute,
                cache,
                max_concurrency,
            };
            cli::run::run(config, options, cli.json).await
        }

        Commands::Plan => cli::plan::plan(cli.json),

        Commands::Cache { action } => {
            cli::cache::handle_cache_command(action, &config, cli.json).await
        }
    };

    shutdown_tracing();
    result
}
