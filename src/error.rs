//! Error taxonomy for result coordination
//!
//! Failures a caller has to tell apart are returned as [`Error`]. Collection
//! recovers from the per-file kinds (`Corrupt`, `NotFound`, `ShapeMismatch`)
//! by skipping the offending input; `ConsistencyViolation` is always fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Typed error for store, lock and aggregation operations
#[derive(Debug, Error)]
pub enum Error {
    /// A partial-result file already exists (job output is write-once)
    #[error("partial result already exists: {}", path.display())]
    Conflict { path: PathBuf },

    /// The requested file does not exist
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The file exists but its contents cannot be decoded
    #[error("corrupt file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Release attempted by a caller that does not own the lock
    #[error("lock {} is held by {owner}", path.display())]
    LockViolation { path: PathBuf, owner: String },

    /// A record does not fit the shape established for its algorithm
    #[error("algorithm {algorithm}: {detail}")]
    ShapeMismatch { algorithm: String, detail: String },

    /// Two algorithms disagree on the objective value of the same instance
    #[error(
        "objective mismatch at dimension {dimension}, channel {channel}: \
         {reference}={expected} vs {algorithm}={found} (tolerance {tolerance})"
    )]
    ConsistencyViolation {
        reference: String,
        algorithm: String,
        dimension: usize,
        channel: usize,
        expected: f64,
        found: f64,
        tolerance: f64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the collector may skip the input that produced this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Corrupt { .. } | Error::NotFound { .. } | Error::ShapeMismatch { .. } | Error::Io(_)
        )
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Map an IO error on `path` into the taxonomy
    pub(crate) fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound { path: path.into() },
            std::io::ErrorKind::AlreadyExists => Error::Conflict { path: path.into() },
            _ => Error::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mapping() {
        let err = Error::from_io("a.h5", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(err, Error::NotFound { .. }));

        let err = Error::from_io("a.h5", std::io::Error::from(std::io::ErrorKind::AlreadyExists));
        assert!(matches!(err, Error::Conflict { .. }));

        let err = Error::from_io("a.h5", std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_consistency_is_fatal() {
        let err = Error::ConsistencyViolation {
            reference: "mmp".to_string(),
            algorithm: "dm".to_string(),
            dimension: 3,
            channel: 7,
            expected: 1.0,
            found: 1.5,
            tolerance: 1e-3,
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("dimension 3, channel 7"));
        assert!(Error::corrupt("x", "bad").is_recoverable());
    }
}
