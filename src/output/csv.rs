//! Delimited table output
//!
//! One file per metric, named `<prefix><metric>.dat`. Rows are dimensions
//! (1-based), columns are algorithms in evaluation order:
//!
//! ```text
//! ,dm,mmp,mapel
//! 1,,,
//! 2,0.0123,0.0051,0.2
//! 3,0.57,0.09,
//! ```
//!
//! The header's first field is empty (it labels the index column), names
//! holding the delimiter or a quote are quoted, and missing values are
//! empty fields, which pandas, R and spreadsheet tools
//! all read back as not-a-number.

use crate::error::Error;
use crate::stats::{AggregatedRow, Evaluation};
use std::borrow::Cow;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Exported metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Mean runtime in seconds
    Runtime,
    /// Median runtime in seconds
    RuntimeMedian,
    /// Mean peak memory in bytes
    Memory,
    /// Mean iteration count
    Iterations,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Runtime,
        Metric::RuntimeMedian,
        Metric::Memory,
        Metric::Iterations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Runtime => "runtime",
            Metric::RuntimeMedian => "runtime_median",
            Metric::Memory => "memory",
            Metric::Iterations => "iterations",
        }
    }

    pub fn value(self, row: &AggregatedRow) -> Option<f64> {
        match self {
            Metric::Runtime => row.mean_runtime,
            Metric::RuntimeMedian => row.median_runtime,
            Metric::Memory => row.mean_memory,
            Metric::Iterations => row.mean_iterations,
        }
    }
}

/// Writes evaluation tables as delimited text
#[derive(Debug, Clone)]
pub struct TableExporter {
    delimiter: char,
    metrics: Vec<Metric>,
}

impl TableExporter {
    /// Comma-delimited exporter for every metric
    pub fn new() -> Self {
        Self {
            delimiter: ',',
            metrics: Metric::ALL.to_vec(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_metrics(mut self, metrics: &[Metric]) -> Self {
        self.metrics = metrics.to_vec();
        self
    }

    /// Destination of `metric` for `prefix`
    pub fn table_path(prefix: &Path, metric: Metric) -> PathBuf {
        let mut name: OsString = prefix.as_os_str().to_owned();
        name.push(metric.name());
        name.push(".dat");
        PathBuf::from(name)
    }

    /// Write one table per metric; returns the files written
    pub fn export(&self, evaluation: &Evaluation, prefix: &Path) -> Result<Vec<PathBuf>, Error> {
        let mut written = Vec::with_capacity(self.metrics.len());
        for &metric in &self.metrics {
            let path = Self::table_path(prefix, metric);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            let mut writer = BufWriter::new(File::create(&path)?);
            self.write_table(&mut writer, evaluation, metric)?;
            writer.flush()?;
            written.push(path);
        }
        Ok(written)
    }

    /// Render the table of `metric` into `out`
    pub fn write_table<W: Write>(&self, out: &mut W, evaluation: &Evaluation, metric: Metric) -> Result<(), Error> {
        let d = self.delimiter;

        for algorithm in evaluation.algorithms() {
            write!(out, "{}{}", d, quote_field(algorithm, d))?;
        }
        writeln!(out)?;

        for dimension in 1..=evaluation.dimensions() {
            write!(out, "{}", dimension)?;
            for algorithm in evaluation.algorithms() {
                let value = evaluation
                    .rows(algorithm)
                    .and_then(|rows| rows.get(dimension - 1))
                    .and_then(|row| metric.value(row));
                match value {
                    Some(v) => write!(out, "{}{}", d, v)?,
                    None => write!(out, "{}", d)?,
                }
            }
            writeln!(out)?;
        }

        Ok(())
    }
}

/// Quote `field` if it holds the delimiter, a quote or a line break
fn quote_field(field: &str, delimiter: char) -> Cow<'_, str> {
    if field.contains(|c| c == delimiter || c == '"' || c == '\n' || c == '\r') {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

impl Default for TableExporter {
    fn default() -> Self {
        Self::new()
    }
}
