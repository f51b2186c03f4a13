//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! Everything a collection or evaluation needs is carried here explicitly;
//! nothing is read from the environment.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::collect::{CollectionPlan, TagGroup};
use crate::stats::aggregator::{DEFAULT_CUTOFF, DEFAULT_OBJECTIVE_TOLERANCE};
use crate::stats::filter::DEFAULT_CENSOR_SECONDS;
use crate::stats::{ConvergencePolicy, EvaluationSettings, TimeoutOverride};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Complete experiment configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub evaluate: EvaluateConfig,
}

/// Where job files live and how they are merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectConfig {
    /// Root of the job output tree (scanned recursively)
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Consolidated store file
    #[serde(default = "default_store")]
    pub store: PathBuf,
    /// Channels per dimension
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
    /// Tag groups to collect
    #[serde(default)]
    pub groups: Vec<TagGroup>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_store() -> PathBuf {
    PathBuf::from("result.mp")
}

fn default_num_channels() -> usize {
    100
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            store: default_store(),
            num_channels: default_num_channels(),
            groups: Vec::new(),
        }
    }
}

impl CollectConfig {
    pub fn plan(&self) -> CollectionPlan {
        CollectionPlan {
            num_channels: self.num_channels,
            groups: self.groups.clone(),
        }
    }
}

/// Filtering, reduction and export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateConfig {
    /// Incomplete iterations tolerated before a run is excluded
    #[serde(default = "default_cutoff")]
    pub cutoff: usize,
    /// Per-algorithm cutoffs replacing `cutoff`
    #[serde(default)]
    pub cutoff_overrides: BTreeMap<String, usize>,
    /// Per-algorithm allowance of unusable channels before a whole
    /// dimension is dropped (defaults to the algorithm's cutoff)
    #[serde(default)]
    pub max_missing_channels: BTreeMap<String, usize>,
    /// Runs confirmed to have hit the wall-clock budget
    #[serde(default)]
    pub timeouts: Vec<TimeoutOverride>,
    /// Runtime imputed for those runs, in seconds
    #[serde(default = "default_censor_seconds")]
    pub censor_seconds: f64,
    /// Absolute tolerance for objective agreement across algorithms
    #[serde(default = "default_objective_tolerance")]
    pub objective_tolerance: f64,
    /// Algorithms (table columns) in order; empty means each collection
    /// group is evaluated on its own
    #[serde(default)]
    pub algorithms: Vec<String>,
    /// Table destination prefix, e.g. `results/tin_`
    #[serde(default)]
    pub output_prefix: Option<PathBuf>,
    /// Optional JSON dump of the evaluation
    #[serde(default)]
    pub json_output: Option<PathBuf>,
}

fn default_cutoff() -> usize {
    DEFAULT_CUTOFF
}

fn default_censor_seconds() -> f64 {
    DEFAULT_CENSOR_SECONDS
}

fn default_objective_tolerance() -> f64 {
    DEFAULT_OBJECTIVE_TOLERANCE
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            cutoff_overrides: BTreeMap::new(),
            max_missing_channels: BTreeMap::new(),
            timeouts: Vec::new(),
            censor_seconds: default_censor_seconds(),
            objective_tolerance: default_objective_tolerance(),
            algorithms: Vec::new(),
            output_prefix: None,
            json_output: None,
        }
    }
}

impl EvaluateConfig {
    pub fn settings(&self) -> EvaluationSettings {
        EvaluationSettings {
            policy: ConvergencePolicy {
                cutoff: self.cutoff,
                overrides: self.cutoff_overrides.clone(),
                channel_overrides: self.max_missing_channels.clone(),
            },
            timeouts: self.timeouts.clone(),
            censor_seconds: self.censor_seconds,
            objective_tolerance: self.objective_tolerance,
        }
    }
}

/// Algorithms evaluated together
///
/// One objective-consistency domain and one set of tables. Different tag
/// groups solve different problems on the same coordinates and are never
/// mixed in one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationSet {
    /// Collection group tag; `None` for an explicit algorithm list
    pub tag: Option<String>,
    pub algorithms: Vec<String>,
}

impl EvaluationSet {
    pub fn label(&self) -> &str {
        self.tag.as_deref().unwrap_or("selected")
    }

    /// Table prefix of this set: `prefix`, followed by `<tag>_` for a group
    pub fn table_prefix(&self, prefix: &Path) -> PathBuf {
        match &self.tag {
            Some(tag) => {
                let mut name = prefix.as_os_str().to_owned();
                name.push(format!("{}_", tag));
                PathBuf::from(name)
            }
            None => prefix.to_path_buf(),
        }
    }
}

impl Config {
    /// Evaluation sets: the explicit list, else one set per collection group
    pub fn evaluation_sets(&self) -> Vec<EvaluationSet> {
        if self.evaluate.algorithms.is_empty() {
            self.collect
                .groups
                .iter()
                .map(|g| EvaluationSet {
                    tag: Some(g.tag.clone()),
                    algorithms: g.algorithms.clone(),
                })
                .collect()
        } else {
            vec![EvaluationSet {
                tag: None,
                algorithms: self.evaluate.algorithms.clone(),
            }]
        }
    }
}
