//! Result collection
//!
//! Merges the partial-result files of many worker jobs into one
//! [`ConsolidatedStore`]. Two paths exist:
//!
//! - [`collect`]: one-shot batch pass after all workers have finished. No
//!   locking; every input file is owned by the job that wrote it.
//! - [`record_late_results`]: a rerun or late job folds its output into an
//!   existing store under the store's [`FileMutex`].
//!
//! Per-file failures never abort a pass. Cluster storage routinely holds
//! files that are still being written or were truncated by a killed job;
//! those are logged and skipped.

pub mod naming;

pub use naming::JobFileName;

use crate::error::Error;
use crate::lock::FileMutex;
use crate::store::{AlgorithmRecord, ConsolidatedStore, JobCoordinates, PartialResultStore};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Algorithms collected from files carrying one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroup {
    /// File name prefix, e.g. `tin` for `tin_dim3_cidx5_prec0.01.mp`
    pub tag: String,
    /// Number of dimension rows in the dense arrays
    pub max_dimension: usize,
    /// Algorithms to merge from these files
    pub algorithms: Vec<String>,
}

/// What to collect and how large the dense arrays are
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPlan {
    pub num_channels: usize,
    pub groups: Vec<TagGroup>,
}

impl CollectionPlan {
    /// Plan with a single tag group
    pub fn single(
        tag: impl Into<String>,
        algorithms: &[&str],
        max_dimension: usize,
        num_channels: usize,
    ) -> Self {
        Self {
            num_channels,
            groups: vec![TagGroup {
                tag: tag.into(),
                max_dimension,
                algorithms: algorithms.iter().map(|a| a.to_string()).collect(),
            }],
        }
    }

    fn group_for(&self, tag: &str) -> Option<&TagGroup> {
        self.groups.iter().find(|g| g.tag == tag)
    }

    /// Empty store with every planned algorithm allocated
    pub fn empty_store(&self) -> ConsolidatedStore {
        let mut store = ConsolidatedStore::new();
        for group in &self.groups {
            for algorithm in &group.algorithms {
                store.ensure_group(algorithm, group.max_dimension, self.num_channels);
            }
        }
        store
    }
}

/// Counters of one merge pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    /// Files matching the naming convention of a planned tag
    pub files_seen: usize,
    /// Files that contributed at least one record
    pub files_merged: usize,
    /// Files skipped entirely (unreadable, corrupt, mislabeled)
    pub files_skipped: usize,
    pub records_merged: usize,
    /// Records rejected individually (shape mismatch, undecodable)
    pub records_skipped: usize,
}

impl CollectionSummary {
    fn absorb(&mut self, other: &CollectionSummary) {
        self.files_seen += other.files_seen;
        self.files_merged += other.files_merged;
        self.files_skipped += other.files_skipped;
        self.records_merged += other.records_merged;
        self.records_skipped += other.records_skipped;
    }
}

/// Decoded content of one job file, ready to merge
struct DecodedJob {
    path: PathBuf,
    group_index: usize,
    coordinates: JobCoordinates,
    records: Vec<(String, AlgorithmRecord)>,
    bad_records: usize,
}

/// Files under `root` whose names match a planned tag, in traversal order
///
/// Traversal is sorted by file name so reruns colliding on one coordinate
/// resolve the same way on every pass.
pub fn scan(root: &Path, plan: &CollectionPlan) -> Result<Vec<(PathBuf, JobFileName)>, Error> {
    if !root.is_dir() {
        return Err(Error::NotFound {
            path: root.to_path_buf(),
        });
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().and_then(JobFileName::parse) else {
            continue;
        };
        if plan.group_for(&name.tag).is_some() {
            found.push((entry.into_path(), name));
        }
    }

    Ok(found)
}

fn decode(path: &Path, name: &JobFileName, plan: &CollectionPlan) -> Result<DecodedJob, Error> {
    let group_index = plan
        .groups
        .iter()
        .position(|g| g.tag == name.tag)
        .ok_or_else(|| Error::corrupt(path, format!("no collection group for tag {}", name.tag)))?;
    let group = &plan.groups[group_index];

    let partial = PartialResultStore::read(path)?;
    let coordinates = partial.coordinates();
    if coordinates != name.coordinates() {
        return Err(Error::corrupt(
            path,
            format!("header says {} but file name says {}", coordinates, name.coordinates()),
        ));
    }

    let mut records = Vec::new();
    let mut bad_records = 0;
    for algorithm in &group.algorithms {
        match partial.record(algorithm) {
            Ok(Some(record)) => records.push((algorithm.clone(), record)),
            Ok(None) => {}
            Err(e) => {
                warn!(file = %path.display(), algorithm = %algorithm, error = %e, "skipping record");
                bad_records += 1;
            }
        }
    }

    Ok(DecodedJob {
        path: path.to_path_buf(),
        group_index,
        coordinates,
        records,
        bad_records,
    })
}

/// Decode `files` in parallel, then merge them into `store` in input order
fn merge_files(
    store: &mut ConsolidatedStore,
    plan: &CollectionPlan,
    files: &[(PathBuf, JobFileName)],
) -> CollectionSummary {
    let decoded: Vec<Result<DecodedJob, Error>> = files
        .par_iter()
        .map(|(path, name)| decode(path, name, plan))
        .collect();

    let mut summary = CollectionSummary {
        files_seen: files.len(),
        ..Default::default()
    };

    for ((path, _), job) in files.iter().zip(decoded) {
        let job = match job {
            Ok(job) => job,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping partial result");
                summary.files_skipped += 1;
                continue;
            }
        };

        summary.records_skipped += job.bad_records;
        let group = &plan.groups[job.group_index];
        let mut merged_any = false;

        for (algorithm, record) in &job.records {
            let target = store.ensure_group(algorithm, group.max_dimension, plan.num_channels);
            match target.place(algorithm, job.coordinates, record) {
                Ok(()) => {
                    summary.records_merged += 1;
                    merged_any = true;
                }
                Err(e) => {
                    warn!(file = %job.path.display(), error = %e, "skipping record");
                    summary.records_skipped += 1;
                }
            }
        }

        if merged_any {
            summary.files_merged += 1;
        }
        debug!(file = %job.path.display(), coordinates = %job.coordinates, records = job.records.len(), "merged");
    }

    summary
}

/// One-shot collection pass over `root`
///
/// Every planned algorithm is present in the returned store, all-missing if
/// no file supplied it. Only a missing `root` is an error.
pub fn collect(root: &Path, plan: &CollectionPlan) -> Result<(ConsolidatedStore, CollectionSummary), Error> {
    let files = scan(root, plan)?;
    info!(root = %root.display(), files = files.len(), "collecting partial results");

    let mut store = plan.empty_store();
    let summary = merge_files(&mut store, plan, &files);

    info!(
        merged = summary.files_merged,
        skipped = summary.files_skipped,
        records = summary.records_merged,
        rejected = summary.records_skipped,
        "collection finished"
    );
    Ok((store, summary))
}

/// Path of the marker guarding `store_path`
pub fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Fold late or rerun job files into the shared store at `store_path`
///
/// Holds the store's [`FileMutex`] for the whole load-merge-save sequence,
/// so concurrent callers serialize and the last one to take the lock wins
/// on colliding cells. A missing store (and its directory) is created from
/// `plan`. Files whose names do not follow the naming convention are
/// skipped.
pub fn record_late_results(
    store_path: &Path,
    plan: &CollectionPlan,
    files: &[PathBuf],
) -> Result<CollectionSummary, Error> {
    let mut summary = CollectionSummary::default();
    let mut named = Vec::new();
    for path in files {
        match path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(JobFileName::parse)
            .filter(|n| plan.group_for(&n.tag).is_some())
        {
            Some(name) => named.push((path.clone(), name)),
            None => {
                warn!(file = %path.display(), "not a planned job file, skipping");
                summary.files_seen += 1;
                summary.files_skipped += 1;
            }
        }
    }

    if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mutex = FileMutex::new(lock_path_for(store_path));
    let guard = mutex.acquire()?;

    let mut store = match ConsolidatedStore::load(store_path) {
        Ok(store) => store,
        Err(Error::NotFound { .. }) => plan.empty_store(),
        Err(e) => return Err(e),
    };
    summary.absorb(&merge_files(&mut store, plan, &named));
    store.save(store_path)?;

    guard.release()?;
    info!(store = %store_path.display(), records = summary.records_merged, "late results recorded");
    Ok(summary)
}
