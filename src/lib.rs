//! mmpcollect - result coordination and aggregation for cluster benchmarks
//!
//! Large numeric experiments run thousands of independent worker jobs, one per
//! problem instance, each leaving a small partial-result file behind. This
//! crate merges those files into dense per-algorithm datasets and reduces
//! them to robust statistics.
//!
//! # Architecture
//!
//! - **Partial results**: write-once per-job files ([`store::partial`])
//! - **Collection**: recursive scan and merge into a consolidated store ([`collect`])
//! - **Coordination**: filesystem mutex for late/rerun merges ([`lock`])
//! - **Statistics**: timeout imputation, convergence filter, reduction and
//!   objective consistency check ([`stats`])
//! - **Output**: per-metric tables, console and JSON summaries ([`output`])

pub mod collect;
pub mod config;
pub mod error;
pub mod lock;
pub mod output;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use collect::{collect, record_late_results, CollectionPlan};
pub use config::Config;
pub use error::Error;
pub use lock::FileMutex;
pub use stats::evaluate;
pub use store::{ConsolidatedStore, PartialResultStore};

/// Result type used by the application layer
pub type Result<T> = anyhow::Result<T>;
