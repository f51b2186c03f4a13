//! JSON output formatting
//!
//! Machine-readable dump of one or more evaluations, keyed by their set
//! label: the per-dimension rows of every algorithm, the whole-table
//! summaries, and the settings that produced them. Missing values are `null`.

use crate::stats::{Evaluation, EvaluationSettings};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Top-level JSON document
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub tool_version: &'static str,
    pub settings: &'a EvaluationSettings,
    pub evaluations: BTreeMap<&'a str, &'a Evaluation>,
}

impl<'a> JsonReport<'a> {
    pub fn new(evaluations: &'a [(String, Evaluation)], settings: &'a EvaluationSettings) -> Self {
        Self {
            generated_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION"),
            settings,
            evaluations: evaluations
                .iter()
                .map(|(label, evaluation)| (label.as_str(), evaluation))
                .collect(),
        }
    }
}

/// Write labelled evaluations as pretty-printed JSON to `path`
pub fn write_evaluations(
    path: &Path,
    evaluations: &[(String, Evaluation)],
    settings: &EvaluationSettings,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create JSON output file: {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &JsonReport::new(evaluations, settings))
        .context("Failed to serialize evaluation")?;
    Ok(())
}
