//! Output formatting
//!
//! - [`csv`]: per-metric delimited tables for downstream analysis
//! - [`text`]: console summaries
//! - [`json`]: machine-readable evaluation dump

pub mod csv;
pub mod json;
pub mod text;

pub use csv::{Metric, TableExporter};
