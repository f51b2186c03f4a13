//! Timeout imputation and convergence filtering
//!
//! Applied to a working copy of one algorithm's grids, in this order:
//!
//! 1. [`MetricTable::impute_timeouts`]: runs confirmed to have hit the
//!    wall-clock budget report `runtime = 0` (or left no file at all); their
//!    runtime becomes the censor value and the cell is marked censored.
//! 2. [`MetricTable::drop_unmeasured`]: any other zero runtime is a run that
//!    was never measured, so the whole cell becomes missing.
//! 3. [`MetricTable::apply_convergence`]: a cell whose iteration trace has
//!    more incomplete entries than the cutoff is cleared from all metrics.
//!    Censored cells are exempt; their runtime is known.
//!
//! After the cross-algorithm objective check,
//! [`MetricTable::drop_sparse_dimensions`] clears every dimension that lost
//! more channels than the algorithm's channel allowance, so a half-finished
//! dimension is not summarized by its few fast instances.

use crate::stats::count_missing;
use crate::store::{AlgorithmGroup, JobCoordinates};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Seven days, the wall-clock budget of a cluster job
pub const DEFAULT_CENSOR_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

/// A run known to have been killed by its time budget
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutOverride {
    pub algorithm: String,
    /// 1-based dimension
    pub dimension: usize,
    pub channel: usize,
}

impl TimeoutOverride {
    pub fn coordinates(&self) -> JobCoordinates {
        JobCoordinates::new(self.dimension, self.channel)
    }
}

/// Incomplete-iteration cutoff and missing-channel allowance, with
/// per-algorithm exceptions
///
/// The channel allowance of an algorithm defaults to its cutoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergencePolicy {
    pub cutoff: usize,
    #[serde(default)]
    pub overrides: BTreeMap<String, usize>,
    #[serde(default)]
    pub channel_overrides: BTreeMap<String, usize>,
}

impl ConvergencePolicy {
    pub fn new(cutoff: usize) -> Self {
        Self {
            cutoff,
            overrides: BTreeMap::new(),
            channel_overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, algorithm: impl Into<String>, cutoff: usize) -> Self {
        self.overrides.insert(algorithm.into(), cutoff);
        self
    }

    pub fn with_channel_override(mut self, algorithm: impl Into<String>, max_missing: usize) -> Self {
        self.channel_overrides.insert(algorithm.into(), max_missing);
        self
    }

    pub fn cutoff_for(&self, algorithm: &str) -> usize {
        self.overrides.get(algorithm).copied().unwrap_or(self.cutoff)
    }

    /// Unusable channels a dimension may have before it is dropped whole
    pub fn max_missing_channels_for(&self, algorithm: &str) -> usize {
        self.channel_overrides
            .get(algorithm)
            .copied()
            .unwrap_or_else(|| self.cutoff_for(algorithm))
    }
}

/// Working copy of one algorithm's metric grids
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTable {
    max_dimension: usize,
    num_channels: usize,
    runtime: Vec<Option<f64>>,
    memory: Vec<Option<f64>>,
    iterations: Vec<Option<f64>>,
    censored: Vec<bool>,
}

impl MetricTable {
    pub fn from_group(group: &AlgorithmGroup) -> Self {
        let rows = group.max_dimension();
        let cols = group.num_channels();
        Self {
            max_dimension: rows,
            num_channels: cols,
            runtime: group.runtime().iter().map(|v| v.map(f64::from)).collect(),
            memory: group.memory().iter().collect(),
            iterations: group.iterations().iter().collect(),
            censored: vec![false; rows * cols],
        }
    }

    pub fn max_dimension(&self) -> usize {
        self.max_dimension
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn index(&self, coordinates: JobCoordinates) -> Option<usize> {
        let JobCoordinates {
            dimension,
            channel_index,
        } = coordinates;
        (dimension >= 1 && dimension <= self.max_dimension && channel_index < self.num_channels)
            .then(|| (dimension - 1) * self.num_channels + channel_index)
    }

    fn clear(&mut self, idx: usize) {
        self.runtime[idx] = None;
        self.memory[idx] = None;
        self.iterations[idx] = None;
    }

    fn row_range(&self, dimension: usize) -> std::ops::Range<usize> {
        let start = (dimension - 1) * self.num_channels;
        start..start + self.num_channels
    }

    /// Runtimes of one dimension (1-based) across channels
    pub fn runtime_row(&self, dimension: usize) -> &[Option<f64>] {
        &self.runtime[self.row_range(dimension)]
    }

    pub fn memory_row(&self, dimension: usize) -> &[Option<f64>] {
        &self.memory[self.row_range(dimension)]
    }

    pub fn iterations_row(&self, dimension: usize) -> &[Option<f64>] {
        &self.iterations[self.row_range(dimension)]
    }

    pub fn runtime(&self, coordinates: JobCoordinates) -> Option<f64> {
        self.index(coordinates).and_then(|i| self.runtime[i])
    }

    pub fn is_censored(&self, coordinates: JobCoordinates) -> bool {
        self.index(coordinates).map(|i| self.censored[i]).unwrap_or(false)
    }

    /// Cell survived filtering
    pub fn is_usable(&self, coordinates: JobCoordinates) -> bool {
        self.runtime(coordinates).is_some()
    }

    /// Cell survived filtering and ran to completion
    pub fn is_converged(&self, coordinates: JobCoordinates) -> bool {
        self.is_usable(coordinates) && !self.is_censored(coordinates)
    }

    /// Usable cells of one dimension
    pub fn usable_in_row(&self, dimension: usize) -> usize {
        self.runtime_row(dimension).iter().filter(|v| v.is_some()).count()
    }

    pub fn censored_count(&self) -> usize {
        self.censored.iter().filter(|c| **c).count()
    }

    /// Replace the runtime of confirmed timeouts with `censor_seconds`
    ///
    /// Only entries naming `algorithm` whose runtime is zero or missing are
    /// touched. Returns the number of cells imputed.
    pub fn impute_timeouts(
        &mut self,
        algorithm: &str,
        timeouts: &[TimeoutOverride],
        censor_seconds: f64,
    ) -> usize {
        let mut imputed = 0;
        for timeout in timeouts.iter().filter(|t| t.algorithm == algorithm) {
            let Some(idx) = self.index(timeout.coordinates()) else {
                debug!(algorithm, cell = %timeout.coordinates(), "timeout entry outside store");
                continue;
            };
            match self.runtime[idx] {
                Some(runtime) if runtime != 0.0 => {
                    debug!(algorithm, cell = %timeout.coordinates(), runtime, "timeout entry has a measured runtime, keeping it");
                }
                _ => {
                    self.runtime[idx] = Some(censor_seconds);
                    self.censored[idx] = true;
                    imputed += 1;
                    info!(algorithm, cell = %timeout.coordinates(), censor_seconds, "imputed timeout");
                }
            }
        }
        imputed
    }

    /// Clear cells whose runtime is zero and not censored
    pub fn drop_unmeasured(&mut self, algorithm: &str) -> usize {
        let mut dropped = 0;
        for idx in 0..self.runtime.len() {
            if !self.censored[idx] && self.runtime[idx].is_some_and(|r| r == 0.0) {
                self.clear(idx);
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(algorithm, dropped, "zero runtimes treated as not measured");
        }
        dropped
    }

    /// Clear cells whose trace has more than `cutoff` incomplete iterations
    ///
    /// The traces come from `group`'s raw cells. Returns the number of cells
    /// excluded.
    pub fn apply_convergence(&mut self, algorithm: &str, group: &AlgorithmGroup, cutoff: usize) -> usize {
        let mut excluded = 0;
        for dimension in 1..=self.max_dimension {
            for channel in 0..self.num_channels {
                let coordinates = JobCoordinates::new(dimension, channel);
                let idx = (dimension - 1) * self.num_channels + channel;
                if self.censored[idx] || self.runtime[idx].is_none() {
                    continue;
                }
                let missing = group
                    .raw(coordinates)
                    .map(|raw| count_missing(&raw.iterations))
                    .unwrap_or(0);
                if missing > cutoff {
                    self.clear(idx);
                    excluded += 1;
                }
            }
        }
        if excluded > 0 {
            info!(algorithm, excluded, cutoff, "excluded unconverged runs");
        }
        excluded
    }

    /// Clear every dimension with more than `max_missing` unusable channels
    ///
    /// Returns the number of dimensions that lost usable cells.
    pub fn drop_sparse_dimensions(&mut self, algorithm: &str, max_missing: usize) -> usize {
        let mut dropped = 0;
        for dimension in 1..=self.max_dimension {
            let usable = self.usable_in_row(dimension);
            if usable == 0 || self.num_channels - usable <= max_missing {
                continue;
            }
            for idx in self.row_range(dimension) {
                self.clear(idx);
            }
            dropped += 1;
            debug!(algorithm, dimension, usable, max_missing, "dimension has too few usable channels");
        }
        if dropped > 0 {
            info!(algorithm, dropped, max_missing, "dropped sparsely covered dimensions");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AlgorithmRecord, MemoryInputs};

    fn record(runtime: f32, missing: usize) -> AlgorithmRecord {
        let mut iterations = vec![Some(1.0); 4];
        iterations.extend(std::iter::repeat(None).take(missing));
        AlgorithmRecord {
            payload: vec![0; 4],
            runtime,
            memory: MemoryInputs {
                max_queue_size: 2,
                data_size: 4,
            },
            iterations,
            objective: Some(1.0),
        }
    }

    fn group(cells: &[(usize, usize, f32, usize)]) -> AlgorithmGroup {
        let mut group = AlgorithmGroup::new(4, 3);
        for (dim, cidx, runtime, missing) in cells {
            group
                .place("alg", JobCoordinates::new(*dim, *cidx), &record(*runtime, *missing))
                .unwrap();
        }
        group
    }

    #[test]
    fn test_policy_override() {
        let policy = ConvergencePolicy::new(6).with_override("mapel", 13);
        assert_eq!(policy.cutoff_for("mmp"), 6);
        assert_eq!(policy.cutoff_for("mapel"), 13);
        assert_eq!(policy.max_missing_channels_for("mmp"), 6);
        assert_eq!(policy.max_missing_channels_for("mapel"), 13);

        let policy = policy.with_channel_override("mmp", 1);
        assert_eq!(policy.max_missing_channels_for("mmp"), 1);
        assert_eq!(policy.cutoff_for("mmp"), 6);
    }

    #[test]
    fn test_drop_sparse_dimensions() {
        // 3 channels: dimension 2 is full, dimension 3 has one usable cell
        let g = group(&[(2, 0, 1.0, 0), (2, 1, 2.0, 0), (2, 2, 3.0, 0), (3, 0, 4.0, 0)]);
        let mut table = MetricTable::from_group(&g);

        assert_eq!(table.drop_sparse_dimensions("alg", 2), 0);
        assert_eq!(table.usable_in_row(3), 1);

        assert_eq!(table.drop_sparse_dimensions("alg", 1), 1);
        assert_eq!(table.runtime_row(3), &[None, None, None]);
        assert_eq!(table.memory_row(3), &[None, None, None]);
        assert_eq!(table.iterations_row(3), &[None, None, None]);
        assert_eq!(table.usable_in_row(2), 3);
    }

    #[test]
    fn test_from_group() {
        let table = MetricTable::from_group(&group(&[(2, 1, 5.0, 0)]));
        assert_eq!(table.runtime_row(2), &[None, Some(5.0), None]);
        assert_eq!(table.memory_row(2)[1], Some(8.0));
        assert_eq!(table.iterations_row(2)[1], Some(4.0));
        assert_eq!(table.usable_in_row(2), 1);
        assert_eq!(table.usable_in_row(1), 0);
    }

    #[test]
    fn test_convergence_excludes_cell() {
        let g = group(&[(2, 0, 1.0, 0), (2, 1, 2.0, 3), (2, 2, 3.0, 2)]);
        let mut table = MetricTable::from_group(&g);

        assert_eq!(table.apply_convergence("alg", &g, 2), 1);
        assert_eq!(table.runtime_row(2), &[Some(1.0), None, Some(3.0)]);
        assert_eq!(table.memory_row(2)[1], None);
        assert_eq!(table.iterations_row(2)[1], None);
    }

    #[test]
    fn test_impute_timeouts() {
        let g = group(&[(3, 0, 0.0, 9), (3, 1, 10.0, 0), (3, 2, 12.0, 0)]);
        let mut table = MetricTable::from_group(&g);
        let timeouts = vec![
            TimeoutOverride { algorithm: "alg".into(), dimension: 3, channel: 0 },
            TimeoutOverride { algorithm: "alg".into(), dimension: 3, channel: 1 },
            TimeoutOverride { algorithm: "alg".into(), dimension: 4, channel: 2 },
            TimeoutOverride { algorithm: "other".into(), dimension: 3, channel: 2 },
            TimeoutOverride { algorithm: "alg".into(), dimension: 9, channel: 0 },
        ];

        assert_eq!(table.impute_timeouts("alg", &timeouts, DEFAULT_CENSOR_SECONDS), 2);
        assert_eq!(table.runtime(JobCoordinates::new(3, 0)), Some(604800.0));
        assert_eq!(table.runtime(JobCoordinates::new(3, 1)), Some(10.0));
        assert_eq!(table.runtime(JobCoordinates::new(4, 2)), Some(604800.0));
        assert_eq!(table.censored_count(), 2);

        // Censored cells survive the later filters despite their trace
        assert_eq!(table.drop_unmeasured("alg"), 0);
        assert_eq!(table.apply_convergence("alg", &g, 2), 0);
        assert!(table.is_usable(JobCoordinates::new(3, 0)));
        assert!(!table.is_converged(JobCoordinates::new(3, 0)));
        assert!(table.is_converged(JobCoordinates::new(3, 1)));
    }

    #[test]
    fn test_drop_unmeasured() {
        let g = group(&[(2, 0, 0.0, 0), (2, 1, 4.0, 0)]);
        let mut table = MetricTable::from_group(&g);

        assert_eq!(table.drop_unmeasured("alg"), 1);
        assert_eq!(table.runtime_row(2), &[None, Some(4.0), None]);
        assert_eq!(table.memory_row(2)[0], None);
    }
}
