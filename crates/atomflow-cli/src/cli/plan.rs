//! `atomflow plan`: show which atoms can run together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use console::style;

use atomflow_core::{MemoryCacheStore, WorkflowEngine};
use atomflow_infra::crypto::hash::Sha256ContentHasher;

use super::pipeline::register_pipeline;

/// Print the pipeline's waves. Atoms in the same wave have no dependency on
/// each other.
pub fn plan(json: bool) -> Result<()> {
    let waves = pipeline_waves()?;

    if json {
        let result = serde_json::json!({ "waves": waves });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    println!("  {} Execution plan", style("▶").bold());
    println!();
    for (index, wave) in waves.iter().enumerate() {
        println!(
            "  {} {}",
            style(format!("wave {}", index + 1)).dim(),
            wave.iter()
                .map(|name| style(name).cyan().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    println!();

    Ok(())
}

fn pipeline_waves() -> Result<Vec<Vec<String>>> {
    let mut engine = WorkflowEngine::new(
        Arc::new(MemoryCacheStore::new()),
        Arc::new(Sha256ContentHasher::new()),
    );
    // The input is only read when `source` runs.
    register_pipeline(&mut engine, PathBuf::new())?;
    Ok(engine.plan()?)
}
