//! Consolidated result store
//!
//! Dense per-algorithm arrays indexed by `[dimension - 1][channel]`, merged
//! from many partial-result files. Cells that no job has filled are `None`.
//!
//! # File Format
//!
//! MessagePack with named fields, one map per algorithm:
//!
//! ```text
//! { created_at: "...",
//!   algorithms: {
//!     "mmp": { max_dimension: 10, num_channels: 100, payload_len: 48,
//!              runtime: {..grid..}, memory: {..grid..}, iterations: {..grid..},
//!              raw_results: { "3": [nil, {payload, iterations, objective}, ...] } } } }
//! ```
//!
//! Floats are stored as IEEE values, so NaN and infinities survive a
//! save/load cycle; only `nil` means missing.

use super::{AlgorithmRecord, JobCoordinates};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Dense row-major 2-D array of optional values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<Option<T>>,
}

impl<T: Copy> Grid<T> {
    /// All-missing grid of `rows x cols`
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![None; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.rows && col < self.cols {
            self.cells[row * self.cols + col]
        } else {
            None
        }
    }

    /// Set a cell; out-of-range coordinates are ignored and reported as `false`
    pub fn set(&mut self, row: usize, col: usize, value: Option<T>) -> bool {
        if row < self.rows && col < self.cols {
            self.cells[row * self.cols + col] = value;
            true
        } else {
            false
        }
    }

    /// Cells of one row, `None` if `row` is out of range
    pub fn row(&self, row: usize) -> Option<&[Option<T>]> {
        if row < self.rows {
            let start = row * self.cols;
            self.cells.get(start..start + self.cols)
        } else {
            None
        }
    }

    /// All cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = Option<T>> + '_ {
        self.cells.iter().copied()
    }

    /// Number of populated cells
    pub fn populated(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    fn is_consistent(&self) -> bool {
        self.cells.len() == self.rows * self.cols
    }
}

/// Raw per-cell data kept alongside the metric grids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCell {
    pub payload: Vec<u8>,
    pub iterations: Vec<Option<f64>>,
    pub objective: Option<f64>,
}

/// Merged results of one algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmGroup {
    max_dimension: usize,
    num_channels: usize,
    /// Payload width fixed by the first record merged
    payload_len: Option<usize>,
    runtime: Grid<f32>,
    memory: Grid<f64>,
    iterations: Grid<f64>,
    /// Dimension (decimal string) to one slot per channel
    raw_results: BTreeMap<String, Vec<Option<RawCell>>>,
}

impl AlgorithmGroup {
    pub fn new(max_dimension: usize, num_channels: usize) -> Self {
        Self {
            max_dimension,
            num_channels,
            payload_len: None,
            runtime: Grid::new(max_dimension, num_channels),
            memory: Grid::new(max_dimension, num_channels),
            iterations: Grid::new(max_dimension, num_channels),
            raw_results: BTreeMap::new(),
        }
    }

    pub fn max_dimension(&self) -> usize {
        self.max_dimension
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn payload_len(&self) -> Option<usize> {
        self.payload_len
    }

    pub fn runtime(&self) -> &Grid<f32> {
        &self.runtime
    }

    pub fn memory(&self) -> &Grid<f64> {
        &self.memory
    }

    pub fn iterations(&self) -> &Grid<f64> {
        &self.iterations
    }

    /// Raw cell at `(dimension, channel)`, 1-based dimension
    pub fn raw(&self, coordinates: JobCoordinates) -> Option<&RawCell> {
        self.raw_results
            .get(&coordinates.dimension.to_string())
            .and_then(|cells| cells.get(coordinates.channel_index))
            .and_then(Option::as_ref)
    }

    /// Dimensions that have at least one raw cell allocated
    pub fn raw_dimensions(&self) -> Vec<usize> {
        let mut dims: Vec<usize> = self.raw_results.keys().filter_map(|k| k.parse().ok()).collect();
        dims.sort_unstable();
        dims
    }

    pub fn contains(&self, coordinates: JobCoordinates) -> bool {
        coordinates.dimension >= 1
            && coordinates.dimension <= self.max_dimension
            && coordinates.channel_index < self.num_channels
    }

    /// Write `record` into the cell at `coordinates`, replacing any previous value
    ///
    /// Fails with [`Error::ShapeMismatch`] when the coordinates fall outside
    /// the arrays or the payload width differs from the one established by
    /// the first record. Nothing is modified on failure.
    pub fn place(
        &mut self,
        algorithm: &str,
        coordinates: JobCoordinates,
        record: &AlgorithmRecord,
    ) -> Result<(), Error> {
        if !self.contains(coordinates) {
            return Err(Error::ShapeMismatch {
                algorithm: algorithm.to_string(),
                detail: format!(
                    "cell {} outside {}x{} arrays",
                    coordinates, self.max_dimension, self.num_channels
                ),
            });
        }

        let width = record.payload.len();
        match self.payload_len {
            Some(expected) if expected != width => {
                return Err(Error::ShapeMismatch {
                    algorithm: algorithm.to_string(),
                    detail: format!(
                        "payload of {} bytes does not match established width {}",
                        width, expected
                    ),
                });
            }
            Some(_) => {}
            None => self.payload_len = Some(width),
        }

        let row = coordinates.dimension - 1;
        let col = coordinates.channel_index;
        self.runtime.set(row, col, Some(record.runtime));
        self.memory.set(row, col, Some(record.memory_bytes()));
        self.iterations.set(row, col, Some(record.iteration_count() as f64));

        let num_channels = self.num_channels;
        let slots = self
            .raw_results
            .entry(coordinates.dimension.to_string())
            .or_insert_with(|| vec![None; num_channels]);
        slots[col] = Some(RawCell {
            payload: record.payload.clone(),
            iterations: record.iterations.clone(),
            objective: record.objective,
        });

        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        for (name, rows, cols, ok) in [
            ("runtime", self.runtime.rows, self.runtime.cols, self.runtime.is_consistent()),
            ("memory", self.memory.rows, self.memory.cols, self.memory.is_consistent()),
            ("iterations", self.iterations.rows, self.iterations.cols, self.iterations.is_consistent()),
        ] {
            if !ok || rows != self.max_dimension || cols != self.num_channels {
                return Err(format!("{} grid does not match {}x{}", name, self.max_dimension, self.num_channels));
            }
        }
        for (dim, cells) in &self.raw_results {
            if cells.len() != self.num_channels {
                return Err(format!("raw_results[{}] has {} slots", dim, cells.len()));
            }
        }
        Ok(())
    }
}

/// All algorithm groups of one experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedStore {
    pub created_at: DateTime<Utc>,
    algorithms: BTreeMap<String, AlgorithmGroup>,
}

impl ConsolidatedStore {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            algorithms: BTreeMap::new(),
        }
    }

    /// Group for `algorithm`, created all-missing on first use
    pub fn ensure_group(
        &mut self,
        algorithm: &str,
        max_dimension: usize,
        num_channels: usize,
    ) -> &mut AlgorithmGroup {
        self.algorithms
            .entry(algorithm.to_string())
            .or_insert_with(|| AlgorithmGroup::new(max_dimension, num_channels))
    }

    pub fn group(&self, algorithm: &str) -> Option<&AlgorithmGroup> {
        self.algorithms.get(algorithm)
    }

    pub fn group_mut(&mut self, algorithm: &str) -> Option<&mut AlgorithmGroup> {
        self.algorithms.get_mut(algorithm)
    }

    pub fn algorithm_names(&self) -> impl Iterator<Item = &str> {
        self.algorithms.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    /// Load a store previously written by [`save`](Self::save)
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read(path).map_err(|e| Error::from_io(path, e))?;
        let store: Self = rmp_serde::from_slice(&content).map_err(|e| Error::corrupt(path, e))?;

        for (name, group) in &store.algorithms {
            group
                .validate()
                .map_err(|reason| Error::corrupt(path, format!("{}: {}", name, reason)))?;
        }
        Ok(store)
    }

    /// Write the store to `path`, replacing it atomically
    ///
    /// The content goes to a sibling temporary file which is then renamed
    /// over `path`, so readers never observe a half-written store.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(format!(".tmp{}", std::process::id()));
        let tmp_path = std::path::PathBuf::from(tmp_name);

        let result = (|| -> Result<(), Error> {
            let file = fs::File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            rmp_serde::encode::write_named(&mut writer, self)
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

impl Default for ConsolidatedStore {
    fn default() -> Self {
        Self::new()
    }
}
