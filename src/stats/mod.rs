//! Statistics over consolidated results
//!
//! Missing values are `None` throughout; every reduction here ignores them.
//! A reduction over nothing but missing values is itself missing, never zero.
//!
//! - [`filter`]: timeout imputation and the convergence filter
//! - [`aggregator`]: per-dimension reduction, ragged truncation and the
//!   cross-algorithm objective check

pub mod aggregator;
pub mod filter;

pub use aggregator::{evaluate, AggregatedRow, AlgorithmSummary, Evaluation, EvaluationSettings};
pub use filter::{ConvergencePolicy, MetricTable, TimeoutOverride};

/// Number of missing entries
pub fn count_missing(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_none()).count()
}

/// Mean of the present values, `None` if there are none
pub fn mean_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Median of the present values, `None` if there are none
///
/// Even counts average the two middle values.
pub fn median_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut present: Vec<f64> = values.into_iter().flatten().collect();
    if present.is_empty() {
        return None;
    }

    present.sort_by(|a, b| a.total_cmp(b));
    let mid = present.len() / 2;
    if present.len() % 2 == 0 {
        Some((present[mid - 1] + present[mid]) / 2.0)
    } else {
        Some(present[mid])
    }
}
