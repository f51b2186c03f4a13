//! Partial-result files
//!
//! One file per worker job, written once. The container is MessagePack:
//!
//! ```text
//! { format_version: 1,
//!   header: { dimension, channel_index, written_at },
//!   algorithms: { "<name>": <MessagePack-encoded AlgorithmRecord>, ... } }
//! ```
//!
//! Each algorithm sub-record is encoded separately so that reading a file
//! only decodes the header and the name index. Individual records are decoded
//! when asked for.

use super::{AlgorithmRecord, JobCoordinates, JobResult};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Container version written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Job identification stored at the top of every partial-result file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHeader {
    pub dimension: usize,
    pub channel_index: usize,
    pub written_at: DateTime<Utc>,
}

impl JobHeader {
    pub fn coordinates(&self) -> JobCoordinates {
        JobCoordinates::new(self.dimension, self.channel_index)
    }
}

#[derive(Serialize, Deserialize)]
struct Container {
    format_version: u32,
    header: JobHeader,
    algorithms: BTreeMap<String, Vec<u8>>,
}

/// Reader/writer for partial-result files
pub struct PartialResultStore;

impl PartialResultStore {
    /// Create `path` holding `records` for the job at `coordinates`
    ///
    /// Fails with [`Error::Conflict`] if the file already exists.
    pub fn write(
        path: &Path,
        coordinates: JobCoordinates,
        records: &BTreeMap<String, AlgorithmRecord>,
    ) -> Result<(), Error> {
        let mut algorithms = BTreeMap::new();
        for (name, record) in records {
            let encoded = rmp_serde::to_vec_named(record)
                .map_err(|e| Error::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;
            algorithms.insert(name.clone(), encoded);
        }

        let container = Container {
            format_version: FORMAT_VERSION,
            header: JobHeader {
                dimension: coordinates.dimension,
                channel_index: coordinates.channel_index,
                written_at: Utc::now(),
            },
            algorithms,
        };
        let bytes = rmp_serde::to_vec_named(&container)
            .map_err(|e| Error::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::from_io(path, e))?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        Ok(())
    }

    /// Write a complete [`JobResult`]
    pub fn write_job(path: &Path, job: &JobResult) -> Result<(), Error> {
        Self::write(path, job.coordinates, &job.records)
    }

    /// Open `path` and decode its header and algorithm index
    pub fn read(path: &Path) -> Result<PartialResult, Error> {
        let bytes = fs::read(path).map_err(|e| Error::from_io(path, e))?;
        let container: Container =
            rmp_serde::from_slice(&bytes).map_err(|e| Error::corrupt(path, e))?;

        if container.format_version != FORMAT_VERSION {
            return Err(Error::corrupt(
                path,
                format!("unsupported format version {}", container.format_version),
            ));
        }

        Ok(PartialResult {
            path: path.to_path_buf(),
            header: container.header,
            algorithms: container.algorithms,
        })
    }
}

/// Lazily decoded view of one partial-result file
#[derive(Debug, Clone)]
pub struct PartialResult {
    path: PathBuf,
    header: JobHeader,
    algorithms: BTreeMap<String, Vec<u8>>,
}

impl PartialResult {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &JobHeader {
        &self.header
    }

    pub fn coordinates(&self) -> JobCoordinates {
        self.header.coordinates()
    }

    /// Names of the algorithms present in the file, sorted
    pub fn algorithm_names(&self) -> impl Iterator<Item = &str> {
        self.algorithms.keys().map(String::as_str)
    }

    pub fn contains(&self, algorithm: &str) -> bool {
        self.algorithms.contains_key(algorithm)
    }

    /// Decode the record of `algorithm`, `None` if the file has none
    pub fn record(&self, algorithm: &str) -> Result<Option<AlgorithmRecord>, Error> {
        match self.algorithms.get(algorithm) {
            Some(bytes) => rmp_serde::from_slice(bytes)
                .map(Some)
                .map_err(|e| Error::corrupt(&self.path, format!("record {}: {}", algorithm, e))),
            None => Ok(None),
        }
    }

    /// Decode every record
    pub fn into_job_result(self) -> Result<JobResult, Error> {
        let mut job = JobResult::new(self.coordinates());
        for name in self.algorithms.keys() {
            if let Some(record) = self.record(name)? {
                job.insert(name.clone(), record);
            }
        }
        Ok(job)
    }
}
