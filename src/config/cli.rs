//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mmpcollect - merge and summarize cluster benchmark results
#[derive(Parser, Debug)]
#[command(name = "mmpcollect")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML experiment configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Consolidated store file (overrides the configuration)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Log filter, e.g. "info" or "mmpcollect=debug" (RUST_LOG is used when absent)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan the job output tree and build the consolidated store
    Collect {
        /// Root of the job output tree
        #[arg(long)]
        root: Option<PathBuf>,

        /// Channels per dimension
        #[arg(long)]
        num_channels: Option<usize>,

        /// Tag group as TAG:MAX_DIMENSION:ALG[,ALG...] (repeatable, replaces configured groups)
        #[arg(long = "group", value_name = "SPEC")]
        groups: Vec<String>,
    },

    /// Merge late or rerun job files into the store under its lock
    Record {
        /// Partial-result files to merge
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Tag group as TAG:MAX_DIMENSION:ALG[,ALG...] (repeatable, replaces configured groups)
        #[arg(long = "group", value_name = "SPEC")]
        groups: Vec<String>,
    },

    /// Filter, reduce and export the consolidated store
    Evaluate {
        /// Incomplete iterations tolerated before a run is excluded
        #[arg(long)]
        cutoff: Option<usize>,

        /// Per-algorithm cutoff as ALG=N (repeatable)
        #[arg(long = "cutoff-override", value_name = "ALG=N")]
        cutoff_overrides: Vec<String>,

        /// Per-algorithm allowance of unusable channels per dimension as ALG=N (repeatable)
        #[arg(long = "max-missing", value_name = "ALG=N")]
        max_missing: Vec<String>,

        /// Confirmed timeout as ALG:DIMENSION:CHANNEL (repeatable)
        #[arg(long = "timeout", value_name = "ALG:DIM:CHANNEL")]
        timeouts: Vec<String>,

        /// Runtime imputed for confirmed timeouts, in seconds
        #[arg(long)]
        censor_seconds: Option<f64>,

        /// Absolute tolerance for objective agreement
        #[arg(long)]
        tolerance: Option<f64>,

        /// Algorithms to evaluate, in column order
        #[arg(long, value_delimiter = ',')]
        algorithms: Vec<String>,

        /// Table destination prefix (tables go to PREFIX<metric>.dat)
        #[arg(long)]
        output_prefix: Option<PathBuf>,

        /// Also write the evaluation as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Show the header and algorithms of one partial-result file
    Inspect {
        file: PathBuf,
    },

    /// Release a lock marker on behalf of a known owner token
    Unlock {
        /// Lock marker file
        lock: PathBuf,

        /// Owner token recorded in the marker
        #[arg(long)]
        token: String,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether the command reads the experiment configuration
    pub fn needs_config(&self) -> bool {
        matches!(
            self.command,
            Command::Collect { .. } | Command::Record { .. } | Command::Evaluate { .. }
        )
    }
}
