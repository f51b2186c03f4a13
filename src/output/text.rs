//! Human-readable text output

use crate::collect::CollectionSummary;
use crate::stats::Evaluation;
use std::fmt::Write as _;

/// Format an optional number, `-` when missing
fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3}", v),
        None => "-".to_string(),
    }
}

/// Format seconds as the largest sensible unit
pub fn format_seconds(seconds: f64) -> String {
    if seconds >= 86_400.0 {
        format!("{:.2}d", seconds / 86_400.0)
    } else if seconds >= 3_600.0 {
        format!("{:.2}h", seconds / 3_600.0)
    } else if seconds >= 60.0 {
        format!("{:.2}m", seconds / 60.0)
    } else {
        format!("{:.3}s", seconds)
    }
}

/// Render the per-algorithm mean / median runtime summary
pub fn render_summary(evaluation: &Evaluation) -> String {
    let mut out = String::new();
    let width = evaluation
        .algorithms()
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("algorithm".len());

    let _ = writeln!(
        out,
        "{:<width$}  {:>12}  {:>12}  {:>7}  {:>8}  {:>8}  {:>6}",
        "algorithm", "mean", "median", "usable", "censored", "excluded", "sparse",
    );
    for summary in evaluation.summaries() {
        let _ = writeln!(
            out,
            "{:<width$}  {:>12}  {:>12}  {:>7}  {:>8}  {:>8}  {:>6}",
            summary.algorithm,
            summary.mean_runtime.map(format_seconds).unwrap_or_else(|| "-".to_string()),
            summary.median_runtime.map(format_seconds).unwrap_or_else(|| "-".to_string()),
            summary.usable_cells,
            summary.censored_cells,
            summary.excluded_cells,
            summary.sparse_dimensions,
        );
    }
    out
}

/// Print evaluation results of one set to console
pub fn print_evaluation(label: &str, evaluation: &Evaluation) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    EVALUATION: {}", label);
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Dimensions: {}", evaluation.dimensions());
    println!();
    print!("{}", render_summary(evaluation));
    println!();

    println!("Mean runtime per dimension (s):");
    print!("{:>5}", "dim");
    for algorithm in evaluation.algorithms() {
        print!("  {:>12}", algorithm);
    }
    println!();
    for dimension in 1..=evaluation.dimensions() {
        print!("{:>5}", dimension);
        for algorithm in evaluation.algorithms() {
            let value = evaluation
                .rows(algorithm)
                .and_then(|rows| rows.get(dimension - 1))
                .and_then(|row| row.mean_runtime);
            print!("  {:>12}", format_value(value));
        }
        println!();
    }
}

/// Print the counters of a collection pass
pub fn print_collection(summary: &CollectionSummary) {
    println!("Files matched:   {}", summary.files_seen);
    println!("Files merged:    {}", summary.files_merged);
    println!("Files skipped:   {}", summary.files_skipped);
    println!("Records merged:  {}", summary.records_merged);
    println!("Records skipped: {}", summary.records_skipped);
}
