//! Built-in text-analysis pipeline used by `atomflow run` and `atomflow plan`.
//!
//! ```text
//! source -> lines -> words -> frequencies -> top_words
//!              \        \          \            |
//!               +--------+----------+-------> summary
//! ```
//!
//! `source` re-reads the input file on every run; everything downstream is
//! cached by content and only re-runs when the text it consumes changes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use atomflow_core::{AtomDefinition, CacheStore, WorkflowEngine};
use atomflow_types::atom::AtomFailure;
use atomflow_types::error::EngineError;
use serde_json::{json, Value};

/// Number of entries kept by `top_words`.
pub const TOP_WORDS: usize = 10;

/// Atom names in registration order.
pub const ATOMS: [&str; 6] = ["source", "lines", "words", "frequencies", "top_words", "summary"];

/// Register the pipeline reading `input`.
pub fn register_pipeline<C: CacheStore + 'static>(
    engine: &mut WorkflowEngine<C>,
    input: PathBuf,
) -> Result<(), EngineError> {
    engine.register(
        AtomDefinition::from_fn("source", move |_| {
            let input = input.clone();
            async move {
                let text = tokio::fs::read_to_string(&input).await?;
                Ok::<_, AtomFailure>(Value::String(text))
            }
        })
        .force_recompute(true),
    )?;

    engine.register(
        AtomDefinition::from_sync_fn("lines", |inputs| {
            let text = expect_str(&inputs[0], "source")?;
            let lines: Vec<Value> = text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect();
            Ok(Value::Array(lines))
        })
        .depends_on(["source"]),
    )?;

    engine.register(
        AtomDefinition::from_sync_fn("words", |inputs| {
            let lines = expect_array(&inputs[0], "lines")?;
            let mut words = Vec::new();
            for line in lines {
                let line = expect_str(line, "lines")?;
                words.extend(
                    line.split(|c: char| !c.is_alphanumeric() && c != '\'')
                        .map(|w| w.trim_matches('\''))
                        .filter(|w| !w.is_empty())
                        .map(|w| Value::String(w.to_lowercase())),
                );
            }
            Ok(Value::Array(words))
        })
        .depends_on(["lines"]),
    )?;

    engine.register(
        AtomDefinition::from_sync_fn("frequencies", |inputs| {
            let words = expect_array(&inputs[0], "words")?;
            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for word in words {
                *counts
                    .entry(expect_str(word, "words")?.to_string())
                    .or_insert(0) += 1;
            }
            Ok(json!(counts))
        })
        .depends_on(["words"]),
    )?;

    engine.register(
        AtomDefinition::from_sync_fn("top_words", |inputs| {
            let counts = inputs[0]
                .as_object()
                .ok_or_else(|| AtomFailure::new("validation", "frequencies must be an object"))?;
            let mut ranked: Vec<(&String, u64)> = counts
                .iter()
                .map(|(word, n)| (word, n.as_u64().unwrap_or(0)))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
            let top: Vec<Value> = ranked
                .into_iter()
                .take(TOP_WORDS)
                .map(|(word, n)| json!({ "word": word, "count": n }))
                .collect();
            Ok(Value::Array(top))
        })
        .depends_on(["frequencies"]),
    )?;

    engine.register(
        AtomDefinition::from_sync_fn("summary", |inputs| {
            let lines = expect_array(&inputs[0], "lines")?.len();
            let words = expect_array(&inputs[1], "words")?.len();
            let unique = inputs[2].as_object().map(|m| m.len()).unwrap_or(0);
            Ok(json!({
                "lines": lines,
                "words": words,
                "unique_words": unique,
                "top_words": inputs[3],
            }))
        })
        .depends_on(["lines", "words", "frequencies", "top_words"]),
    )?;

    Ok(())
}

fn expect_str<'a>(value: &'a Value, from: &str) -> Result<&'a str, AtomFailure> {
    value
        .as_str()
        .ok_or_else(|| AtomFailure::new("validation", format!("expected text from '{from}'")))
}

fn expect_array<'a>(value: &'a Value, from: &str) -> Result<&'a Vec<Value>, AtomFailure> {
    value
        .as_array()
        .ok_or_else(|| AtomFailure::new("validation", format!("expected a list from '{from}'")))
}
