//! Statistics aggregation
//!
//! Reduces a [`ConsolidatedStore`] to one [`AggregatedRow`] per dimension and
//! algorithm.
//!
//! # Pipeline
//!
//! For every requested algorithm:
//!
//! 1. copy its grids into a [`MetricTable`]
//! 2. impute confirmed timeouts, drop unmeasured zero runtimes, exclude
//!    unconverged runs (see [`crate::stats::filter`])
//! 3. check that converged runs of different algorithms agree on the
//!    objective value of each instance; a disagreement is fatal
//! 4. drop dimensions that lost more channels than the algorithm allows
//! 5. reduce each dimension over its usable channels
//!
//! The output is truncated to the smallest dimension count among the
//! requested algorithms so that every table column has the same length.
//!
//! # Example
//!
//! ```
//! use mmpcollect::stats::{evaluate, EvaluationSettings};
//! use mmpcollect::store::{AlgorithmRecord, ConsolidatedStore, JobCoordinates, MemoryInputs};
//!
//! let record = AlgorithmRecord {
//!     payload: vec![0; 8],
//!     runtime: 12.5,
//!     memory: MemoryInputs { max_queue_size: 10, data_size: 8 },
//!     iterations: vec![Some(1.0), Some(0.5)],
//!     objective: Some(3.0),
//! };
//!
//! let mut store = ConsolidatedStore::new();
//! store
//!     .ensure_group("mmp", 4, 4)
//!     .place("mmp", JobCoordinates::new(3, 5), &record)
//!     .unwrap();
//!
//! let evaluation = evaluate(&store, &["mmp".to_string()], &EvaluationSettings::default()).unwrap();
//! let row = &evaluation.rows("mmp").unwrap()[2];
//! assert_eq!(row.dimension, 3);
//! assert_eq!(row.mean_runtime, Some(12.5));
//! assert_eq!(row.mean_memory, Some(80.0));
//! ```

use crate::error::Error;
use crate::stats::filter::{ConvergencePolicy, MetricTable, TimeoutOverride, DEFAULT_CENSOR_SECONDS};
use crate::stats::{mean_present, median_present};
use crate::store::{AlgorithmGroup, ConsolidatedStore, JobCoordinates};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Default absolute tolerance for objective agreement
pub const DEFAULT_OBJECTIVE_TOLERANCE: f64 = 1e-3;

/// Default incomplete-iteration cutoff
pub const DEFAULT_CUTOFF: usize = 6;

/// Knobs of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub policy: ConvergencePolicy,
    pub timeouts: Vec<TimeoutOverride>,
    /// Runtime imputed for confirmed timeouts, in seconds
    pub censor_seconds: f64,
    pub objective_tolerance: f64,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            policy: ConvergencePolicy::new(DEFAULT_CUTOFF),
            timeouts: Vec::new(),
            censor_seconds: DEFAULT_CENSOR_SECONDS,
            objective_tolerance: DEFAULT_OBJECTIVE_TOLERANCE,
        }
    }
}

/// Reduced metrics of one algorithm at one dimension
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    /// 1-based dimension
    pub dimension: usize,
    pub mean_runtime: Option<f64>,
    pub median_runtime: Option<f64>,
    pub mean_memory: Option<f64>,
    pub mean_iterations: Option<f64>,
    /// Channels that survived filtering
    pub usable_channels: usize,
}

/// Whole-table figures of one algorithm
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmSummary {
    pub algorithm: String,
    pub mean_runtime: Option<f64>,
    pub median_runtime: Option<f64>,
    pub usable_cells: usize,
    pub censored_cells: usize,
    pub unmeasured_cells: usize,
    pub excluded_cells: usize,
    /// Dimensions cleared for missing too many channels
    pub sparse_dimensions: usize,
}

/// Result of [`evaluate`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    algorithms: Vec<String>,
    dimensions: usize,
    rows: BTreeMap<String, Vec<AggregatedRow>>,
    summaries: Vec<AlgorithmSummary>,
}

impl Evaluation {
    /// Evaluated algorithms in request order
    pub fn algorithms(&self) -> &[String] {
        &self.algorithms
    }

    /// Number of rows per algorithm after truncation
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn rows(&self, algorithm: &str) -> Option<&[AggregatedRow]> {
        self.rows.get(algorithm).map(Vec::as_slice)
    }

    pub fn summaries(&self) -> &[AlgorithmSummary] {
        &self.summaries
    }
}

struct Prepared<'a> {
    algorithm: &'a str,
    group: &'a AlgorithmGroup,
    table: MetricTable,
    censored: usize,
    unmeasured: usize,
    excluded: usize,
    sparse: usize,
}

fn prepare<'a>(algorithm: &'a str, group: &'a AlgorithmGroup, settings: &EvaluationSettings) -> Prepared<'a> {
    let mut table = MetricTable::from_group(group);
    let censored = table.impute_timeouts(algorithm, &settings.timeouts, settings.censor_seconds);
    let unmeasured = table.drop_unmeasured(algorithm);
    let excluded = table.apply_convergence(algorithm, group, settings.policy.cutoff_for(algorithm));

    Prepared {
        algorithm,
        group,
        table,
        censored,
        unmeasured,
        excluded,
        sparse: 0,
    }
}

fn agrees(a: f64, b: f64, tolerance: f64) -> bool {
    a == b || (a - b).abs() <= tolerance
}

/// Compare objective values of converged runs on every shared instance
///
/// The first algorithm (in request order) with a converged objective on an
/// instance is the reference for that instance.
fn check_consistency(prepared: &[Prepared<'_>], tolerance: f64) -> Result<usize, Error> {
    let max_dimension = prepared.iter().map(|p| p.table.max_dimension()).max().unwrap_or(0);
    let num_channels = prepared.iter().map(|p| p.table.num_channels()).max().unwrap_or(0);
    let mut compared = 0;

    for dimension in 1..=max_dimension {
        for channel in 0..num_channels {
            let coordinates = JobCoordinates::new(dimension, channel);
            let mut reference: Option<(&str, f64)> = None;

            for p in prepared {
                if !p.table.is_converged(coordinates) {
                    continue;
                }
                let Some(objective) = p.group.raw(coordinates).and_then(|raw| raw.objective) else {
                    continue;
                };
                match reference {
                    None => reference = Some((p.algorithm, objective)),
                    Some((name, expected)) => {
                        compared += 1;
                        if !agrees(expected, objective, tolerance) {
                            return Err(Error::ConsistencyViolation {
                                reference: name.to_string(),
                                algorithm: p.algorithm.to_string(),
                                dimension,
                                channel,
                                expected,
                                found: objective,
                                tolerance,
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(compared)
}

fn reduce(table: &MetricTable, dimension: usize) -> AggregatedRow {
    let runtime = table.runtime_row(dimension);
    AggregatedRow {
        dimension,
        mean_runtime: mean_present(runtime.iter().copied()),
        median_runtime: median_present(runtime.iter().copied()),
        mean_memory: mean_present(table.memory_row(dimension).iter().copied()),
        mean_iterations: mean_present(table.iterations_row(dimension).iter().copied()),
        usable_channels: table.usable_in_row(dimension),
    }
}

/// Filter and reduce `algorithms` from `store`
///
/// Algorithms absent from the store are skipped with a warning. Fails only
/// with [`Error::ConsistencyViolation`].
pub fn evaluate(
    store: &ConsolidatedStore,
    algorithms: &[String],
    settings: &EvaluationSettings,
) -> Result<Evaluation, Error> {
    let mut prepared = Vec::with_capacity(algorithms.len());
    for algorithm in algorithms {
        match store.group(algorithm) {
            Some(group) => prepared.push(prepare(algorithm, group, settings)),
            None => warn!(algorithm = %algorithm, "algorithm not in store, skipping"),
        }
    }

    let compared = check_consistency(&prepared, settings.objective_tolerance)?;
    info!(compared, tolerance = settings.objective_tolerance, "objective values consistent");

    for p in &mut prepared {
        let max_missing = settings.policy.max_missing_channels_for(p.algorithm);
        p.sparse = p.table.drop_sparse_dimensions(p.algorithm, max_missing);
    }

    let dimensions = prepared.iter().map(|p| p.table.max_dimension()).min().unwrap_or(0);

    let mut rows = BTreeMap::new();
    let mut summaries = Vec::with_capacity(prepared.len());
    for p in &prepared {
        let series: Vec<AggregatedRow> = (1..=dimensions).map(|d| reduce(&p.table, d)).collect();

        let runtimes = (1..=dimensions).flat_map(|d| p.table.runtime_row(d).iter().copied());
        summaries.push(AlgorithmSummary {
            algorithm: p.algorithm.to_string(),
            mean_runtime: mean_present(runtimes.clone()),
            median_runtime: median_present(runtimes),
            usable_cells: series.iter().map(|r| r.usable_channels).sum(),
            censored_cells: p.censored,
            unmeasured_cells: p.unmeasured,
            excluded_cells: p.excluded,
            sparse_dimensions: p.sparse,
        });
        rows.insert(p.algorithm.to_string(), series);
    }

    Ok(Evaluation {
        algorithms: prepared.iter().map(|p| p.algorithm.to_string()).collect(),
        dimensions,
        rows,
        summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AlgorithmRecord, MemoryInputs};

    fn record(runtime: f32, missing: usize, objective: f64) -> AlgorithmRecord {
        let mut iterations = vec![Some(1.0); 3];
        iterations.extend(std::iter::repeat(None).take(missing));
        AlgorithmRecord {
            payload: vec![0; 4],
            runtime,
            memory: MemoryInputs {
                max_queue_size: 10,
                data_size: 10,
            },
            iterations,
            objective: Some(objective),
        }
    }

    fn place(store: &mut ConsolidatedStore, alg: &str, dims: usize, dim: usize, cidx: usize, rec: AlgorithmRecord) {
        store.ensure_group(alg, dims, 4).place(alg, JobCoordinates::new(dim, cidx), &rec).unwrap();
    }

    fn names(algs: &[&str]) -> Vec<String> {
        algs.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_mean_over_usable_channels() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 2, 0, record(1.0, 0, 5.0));
        place(&mut store, "mmp", 3, 2, 1, record(3.0, 0, 5.0));
        place(&mut store, "mmp", 3, 2, 2, record(100.0, 7, 5.0));

        let evaluation = evaluate(&store, &names(&["mmp"]), &EvaluationSettings::default()).unwrap();
        let rows = evaluation.rows("mmp").unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].dimension, 2);
        assert_eq!(rows[1].mean_runtime, Some(2.0));
        assert_eq!(rows[1].median_runtime, Some(2.0));
        assert_eq!(rows[1].mean_memory, Some(100.0));
        assert_eq!(rows[1].mean_iterations, Some(3.0));
        assert_eq!(rows[1].usable_channels, 2);
        assert_eq!(evaluation.summaries()[0].excluded_cells, 1);
    }

    #[test]
    fn test_all_excluded_is_missing_not_zero() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 3, 0, record(1.0, 9, 5.0));
        place(&mut store, "mmp", 3, 3, 1, record(2.0, 9, 5.0));

        let evaluation = evaluate(&store, &names(&["mmp"]), &EvaluationSettings::default()).unwrap();
        let row = &evaluation.rows("mmp").unwrap()[2];

        assert_eq!(row.mean_runtime, None);
        assert_eq!(row.median_runtime, None);
        assert_eq!(row.mean_memory, None);
        assert_eq!(row.usable_channels, 0);
    }

    #[test]
    fn test_per_algorithm_cutoff() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mapel", 2, 2, 0, record(4.0, 10, 5.0));
        place(&mut store, "mmp", 2, 2, 0, record(4.0, 10, 5.0));

        let mut settings = EvaluationSettings::default();
        settings.policy = ConvergencePolicy::new(6).with_override("mapel", 13);

        let evaluation = evaluate(&store, &names(&["mapel", "mmp"]), &settings).unwrap();
        assert_eq!(evaluation.rows("mapel").unwrap()[1].mean_runtime, Some(4.0));
        assert_eq!(evaluation.rows("mmp").unwrap()[1].mean_runtime, None);
    }

    #[test]
    fn test_timeout_imputation_changes_mean() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "ratespace", 3, 3, 0, record(0.0, 0, 5.0));
        place(&mut store, "ratespace", 3, 3, 1, record(200.0, 0, 5.0));

        let without = evaluate(&store, &names(&["ratespace"]), &EvaluationSettings::default()).unwrap();
        assert_eq!(without.rows("ratespace").unwrap()[2].mean_runtime, Some(200.0));
        assert_eq!(without.summaries()[0].unmeasured_cells, 1);

        let mut settings = EvaluationSettings::default();
        settings.timeouts.push(TimeoutOverride {
            algorithm: "ratespace".to_string(),
            dimension: 3,
            channel: 0,
        });
        let with = evaluate(&store, &names(&["ratespace"]), &settings).unwrap();
        let row = &with.rows("ratespace").unwrap()[2];
        assert_eq!(row.mean_runtime, Some((604800.0 + 200.0) / 2.0));
        assert_eq!(row.usable_channels, 2);
        assert_eq!(with.summaries()[0].censored_cells, 1);
    }

    #[test]
    fn test_truncates_to_shortest_algorithm() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "tall", 6, 5, 0, record(1.0, 0, 5.0));
        place(&mut store, "short", 4, 2, 0, record(1.0, 0, 5.0));

        let evaluation = evaluate(&store, &names(&["tall", "short", "absent"]), &EvaluationSettings::default()).unwrap();
        assert_eq!(evaluation.dimensions(), 4);
        assert_eq!(evaluation.algorithms(), &names(&["tall", "short"])[..]);
        assert_eq!(evaluation.rows("tall").unwrap().len(), 4);
        assert_eq!(evaluation.rows("short").unwrap().len(), 4);
    }

    #[test]
    fn test_consistency_violation() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 2, 1, record(1.0, 0, 10.0));
        place(&mut store, "dm", 3, 2, 1, record(2.0, 0, 10.01));

        let err = evaluate(&store, &names(&["mmp", "dm"]), &EvaluationSettings::default()).unwrap_err();
        match err {
            Error::ConsistencyViolation {
                reference,
                algorithm,
                dimension,
                channel,
                ..
            } => {
                assert_eq!(reference, "mmp");
                assert_eq!(algorithm, "dm");
                assert_eq!((dimension, channel), (2, 1));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_consistency_within_tolerance() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 2, 1, record(1.0, 0, 10.0));
        place(&mut store, "dm", 3, 2, 1, record(2.0, 0, 10.0005));

        assert!(evaluate(&store, &names(&["mmp", "dm"]), &EvaluationSettings::default()).is_ok());
    }

    #[test]
    fn test_consistency_ignores_unconverged() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 2, 1, record(1.0, 0, 10.0));
        place(&mut store, "dm", 3, 2, 1, record(2.0, 8, 99.0));
        place(&mut store, "pa", 3, 2, 1, record(0.0, 0, 42.0));

        let mut settings = EvaluationSettings::default();
        settings.timeouts.push(TimeoutOverride {
            algorithm: "pa".to_string(),
            dimension: 2,
            channel: 1,
        });
        assert!(evaluate(&store, &names(&["mmp", "dm", "pa"]), &settings).is_ok());
    }

    #[test]
    fn test_consistency_non_finite_objective_fails() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 2, 1, record(1.0, 0, 10.0));
        place(&mut store, "dm", 3, 2, 1, record(2.0, 0, f64::INFINITY));

        assert!(evaluate(&store, &names(&["mmp", "dm"]), &EvaluationSettings::default()).is_err());
    }

    #[test]
    fn test_sparse_dimension_dropped() {
        // Dimension 2 keeps 1 of 4 channels: 3 missing
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mapel", 3, 2, 0, record(1.0, 0, 5.0));
        place(&mut store, "mmp", 3, 2, 0, record(1.0, 0, 5.0));
        place(&mut store, "mmp", 3, 3, 0, record(2.0, 0, 5.0));
        place(&mut store, "mmp", 3, 3, 1, record(2.0, 0, 5.0));
        place(&mut store, "mmp", 3, 3, 2, record(2.0, 0, 5.0));

        let mut settings = EvaluationSettings::default();
        settings.policy = ConvergencePolicy::new(2).with_override("mapel", 13);

        let evaluation = evaluate(&store, &names(&["mmp", "mapel"]), &settings).unwrap();
        let mmp = evaluation.rows("mmp").unwrap();
        assert_eq!(mmp[1].mean_runtime, None);
        assert_eq!(mmp[1].mean_memory, None);
        assert_eq!(mmp[1].mean_iterations, None);
        assert_eq!(mmp[2].mean_runtime, Some(2.0));
        assert_eq!(evaluation.rows("mapel").unwrap()[1].mean_runtime, Some(1.0));

        let summary = &evaluation.summaries()[0];
        assert_eq!(summary.sparse_dimensions, 1);
        assert_eq!(summary.mean_runtime, Some(2.0));
        assert_eq!(summary.usable_cells, 3);
    }

    #[test]
    fn test_saved_store_keeps_diverged_objective() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("result.mp");

        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 2, 1, record(1.0, 0, 10.0));
        place(&mut store, "dm", 3, 2, 1, record(2.0, 0, f64::INFINITY));
        store.save(&path).unwrap();

        let loaded = ConsolidatedStore::load(&path).unwrap();
        let err = evaluate(&loaded, &names(&["mmp", "dm"]), &EvaluationSettings::default()).unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation { .. }));
    }

    #[test]
    fn test_summary() {
        let mut store = ConsolidatedStore::new();
        place(&mut store, "mmp", 3, 2, 0, record(1.0, 0, 5.0));
        place(&mut store, "mmp", 3, 3, 0, record(2.0, 0, 5.0));
        place(&mut store, "mmp", 3, 3, 1, record(6.0, 0, 5.0));

        let evaluation = evaluate(&store, &names(&["mmp"]), &EvaluationSettings::default()).unwrap();
        let summary = &evaluation.summaries()[0];
        assert_eq!(summary.mean_runtime, Some(3.0));
        assert_eq!(summary.median_runtime, Some(2.0));
        assert_eq!(summary.usable_cells, 3);
    }
}
