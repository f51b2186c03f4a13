//! Result records and their on-disk stores
//!
//! A worker job solves one problem instance, identified by
//! [`JobCoordinates`], with one or more algorithms. Each algorithm yields an
//! [`AlgorithmRecord`]. The job writes them once into a partial-result file
//! ([`partial`]); the collector later merges many of those into a
//! [`consolidated::ConsolidatedStore`].

pub mod consolidated;
pub mod partial;

pub use consolidated::{AlgorithmGroup, ConsolidatedStore, Grid, RawCell};
pub use partial::{JobHeader, PartialResult, PartialResultStore};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Problem instance addressed by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobCoordinates {
    /// Problem size (1-based; row `dimension - 1` in the dense arrays)
    pub dimension: usize,
    /// Randomly generated instance within the dimension (0-based column)
    pub channel_index: usize,
}

impl JobCoordinates {
    pub fn new(dimension: usize, channel_index: usize) -> Self {
        Self {
            dimension,
            channel_index,
        }
    }
}

impl fmt::Display for JobCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dim{}/cidx{}", self.dimension, self.channel_index)
    }
}

/// Inputs from which the memory footprint of a run is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInputs {
    /// Peak number of elements held in the solver's work queue
    pub max_queue_size: u64,
    /// Size of one queue element in bytes
    pub data_size: u64,
}

impl MemoryInputs {
    /// Peak memory in bytes: `max_queue_size * data_size`
    pub fn bytes(&self) -> f64 {
        self.max_queue_size as f64 * self.data_size as f64
    }
}

/// Output of one algorithm on one problem instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmRecord {
    /// Opaque solver result, stored and merged byte for byte
    pub payload: Vec<u8>,
    /// Wall-clock runtime in seconds (0 for a run killed by its time budget)
    pub runtime: f32,
    pub memory: MemoryInputs,
    /// One entry per solver iteration; `None` marks an incomplete iteration
    pub iterations: Vec<Option<f64>>,
    /// Objective value reached, if the solver reported one
    pub objective: Option<f64>,
}

impl AlgorithmRecord {
    /// Build a record from a float trace that uses NaN for incomplete iterations
    pub fn from_float_trace(
        payload: Vec<u8>,
        runtime: f32,
        memory: MemoryInputs,
        trace: &[f64],
        objective: Option<f64>,
    ) -> Self {
        Self {
            payload,
            runtime,
            memory,
            iterations: trace.iter().map(|v| (!v.is_nan()).then_some(*v)).collect(),
            objective: objective.filter(|v| !v.is_nan()),
        }
    }

    /// Derived peak memory in bytes
    pub fn memory_bytes(&self) -> f64 {
        self.memory.bytes()
    }

    /// Number of iterations the solver ran
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    /// Number of incomplete iterations in the trace
    pub fn missing_iterations(&self) -> usize {
        crate::stats::count_missing(&self.iterations)
    }
}

/// All records produced by one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub coordinates: JobCoordinates,
    pub records: BTreeMap<String, AlgorithmRecord>,
}

impl JobResult {
    pub fn new(coordinates: JobCoordinates) -> Self {
        Self {
            coordinates,
            records: BTreeMap::new(),
        }
    }

    /// Add or replace the record of `algorithm`
    pub fn insert(&mut self, algorithm: impl Into<String>, record: AlgorithmRecord) {
        self.records.insert(algorithm.into(), record);
    }
}
