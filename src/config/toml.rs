//! TOML configuration file parsing

use super::*;
use crate::config::cli::{Cli, Command};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the configuration named on the command line (or defaults) and apply CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    if let Some(ref store) = cli.store {
        config.collect.store = store.clone();
    }

    match &cli.command {
        Command::Collect {
            root,
            num_channels,
            groups,
        } => {
            if let Some(root) = root {
                config.collect.root = root.clone();
            }
            if let Some(n) = num_channels {
                config.collect.num_channels = *n;
            }
            if !groups.is_empty() {
                config.collect.groups = groups
                    .iter()
                    .map(|s| parse_group_spec(s))
                    .collect::<Result<_>>()?;
            }
        }
        Command::Record { groups, .. } => {
            if !groups.is_empty() {
                config.collect.groups = groups
                    .iter()
                    .map(|s| parse_group_spec(s))
                    .collect::<Result<_>>()?;
            }
        }
        Command::Evaluate {
            cutoff,
            cutoff_overrides,
            max_missing,
            timeouts,
            censor_seconds,
            tolerance,
            algorithms,
            output_prefix,
            json,
        } => {
            if let Some(cutoff) = cutoff {
                config.evaluate.cutoff = *cutoff;
            }
            for spec in cutoff_overrides {
                let (algorithm, cutoff) = parse_cutoff_override(spec)?;
                config.evaluate.cutoff_overrides.insert(algorithm, cutoff);
            }
            for spec in max_missing {
                let (algorithm, allowance) = parse_cutoff_override(spec)?;
                config.evaluate.max_missing_channels.insert(algorithm, allowance);
            }
            for spec in timeouts {
                config.evaluate.timeouts.push(parse_timeout_spec(spec)?);
            }
            if let Some(seconds) = censor_seconds {
                config.evaluate.censor_seconds = *seconds;
            }
            if let Some(tolerance) = tolerance {
                config.evaluate.objective_tolerance = *tolerance;
            }
            if !algorithms.is_empty() {
                config.evaluate.algorithms = algorithms.clone();
            }
            if let Some(prefix) = output_prefix {
                config.evaluate.output_prefix = Some(prefix.clone());
            }
            if let Some(json) = json {
                config.evaluate.json_output = Some(json.clone());
            }
        }
        Command::Inspect { .. } | Command::Unlock { .. } => {}
    }

    Ok(config)
}

/// Parse `TAG:MAX_DIMENSION:ALG[,ALG...]`
pub fn parse_group_spec(spec: &str) -> Result<TagGroup> {
    let mut parts = spec.splitn(3, ':');
    let (tag, max_dimension, algorithms) = match (parts.next(), parts.next(), parts.next()) {
        (Some(t), Some(d), Some(a)) if !t.is_empty() => (t, d, a),
        _ => anyhow::bail!("Invalid group '{}', expected TAG:MAX_DIMENSION:ALG[,ALG...]", spec),
    };

    let max_dimension: usize = max_dimension
        .trim()
        .parse()
        .with_context(|| format!("Invalid max dimension in group '{}'", spec))?;
    let algorithms: Vec<String> = algorithms
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect();
    if algorithms.is_empty() {
        anyhow::bail!("Group '{}' names no algorithms", spec);
    }

    Ok(TagGroup {
        tag: tag.trim().to_string(),
        max_dimension,
        algorithms,
    })
}

/// Parse `ALG:DIMENSION:CHANNEL`
pub fn parse_timeout_spec(spec: &str) -> Result<TimeoutOverride> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 || parts[0].is_empty() {
        anyhow::bail!("Invalid timeout '{}', expected ALG:DIMENSION:CHANNEL", spec);
    }

    Ok(TimeoutOverride {
        algorithm: parts[0].to_string(),
        dimension: parts[1]
            .parse()
            .with_context(|| format!("Invalid dimension in timeout '{}'", spec))?,
        channel: parts[2]
            .parse()
            .with_context(|| format!("Invalid channel in timeout '{}'", spec))?,
    })
}

/// Parse `ALG=N`
pub fn parse_cutoff_override(spec: &str) -> Result<(String, usize)> {
    let (algorithm, cutoff) = spec
        .split_once('=')
        .filter(|(a, _)| !a.is_empty())
        .with_context(|| format!("Invalid cutoff override '{}', expected ALG=N", spec))?;
    let cutoff = cutoff
        .trim()
        .parse()
        .with_context(|| format!("Invalid cutoff in override '{}'", spec))?;
    Ok((algorithm.trim().to_string(), cutoff))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const EXPERIMENT: &str = r#"
[collect]
root = "raw"
store = "out/result.mp"
num_channels = 100

[[collect.groups]]
tag = "tin"
max_dimension = 10
algorithms = ["dm", "mmp", "mmpFifo", "pa", "ratespace", "mapel"]

[[collect.groups]]
tag = "gee"
max_dimension = 10
algorithms = ["gee_mmp", "gee_dinkelbach"]

[evaluate]
cutoff = 6
output_prefix = "out/tin_"
algorithms = ["dm", "mmp", "mmpFifo", "pa", "ratespace", "mapel"]

[evaluate.cutoff_overrides]
mapel = 13

[[evaluate.timeouts]]
algorithm = "ratespace"
dimension = 3
channel = 43

[[evaluate.timeouts]]
algorithm = "ratespace"
dimension = 3
channel = 55
"#;

    #[test]
    fn test_parse_experiment() {
        let config = parse_toml_string(EXPERIMENT).unwrap();
        assert_eq!(config.collect.root, PathBuf::from("raw"));
        assert_eq!(config.collect.groups.len(), 2);
        assert_eq!(config.collect.groups[1].algorithms, vec!["gee_mmp", "gee_dinkelbach"]);
        assert_eq!(config.evaluate.cutoff_overrides.get("mapel"), Some(&13));
        assert_eq!(config.evaluate.timeouts.len(), 2);
        assert_eq!(config.evaluate.timeouts[1].channel, 55);
        assert_eq!(config.evaluate.objective_tolerance, 1e-3);
        assert_eq!(config.evaluate.output_prefix, Some(PathBuf::from("out/tin_")));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_cli_overrides_file() {
        let config = parse_toml_string(EXPERIMENT).unwrap();
        let cli = Cli::try_parse_from([
            "mmpcollect",
            "--store",
            "other.json",
            "evaluate",
            "--cutoff",
            "2",
            "--cutoff-override",
            "dm=1",
            "--max-missing",
            "mapel=20",
            "--timeout",
            "ratespace:3:73",
            "--tolerance",
            "0.01",
        ])
        .unwrap();

        let merged = merge_cli_with_config(&cli, config).unwrap();
        assert_eq!(merged.collect.store, PathBuf::from("other.json"));
        assert_eq!(merged.evaluate.cutoff, 2);
        assert_eq!(merged.evaluate.cutoff_overrides.get("dm"), Some(&1));
        assert_eq!(merged.evaluate.cutoff_overrides.get("mapel"), Some(&13));
        assert_eq!(merged.evaluate.max_missing_channels.get("mapel"), Some(&20));
        assert_eq!(merged.evaluate.timeouts.len(), 3);
        assert_eq!(merged.evaluate.objective_tolerance, 0.01);
    }

    #[test]
    fn test_cli_groups_replace_file_groups() {
        let config = parse_toml_string(EXPERIMENT).unwrap();
        let cli = Cli::try_parse_from(["mmpcollect", "collect", "--group", "aloha:1:MMP,MMPred,GP", "--root", "x"]).unwrap();

        let merged = merge_cli_with_config(&cli, config).unwrap();
        assert_eq!(merged.collect.root, PathBuf::from("x"));
        assert_eq!(merged.collect.groups.len(), 1);
        assert_eq!(merged.collect.groups[0].tag, "aloha");
        assert_eq!(merged.collect.groups[0].algorithms, vec!["MMP", "MMPred", "GP"]);
    }

    #[test]
    fn test_parse_specs() {
        assert!(parse_group_spec("tin:10").is_err());
        assert!(parse_group_spec("tin:ten:dm").is_err());
        assert!(parse_group_spec("tin:10:").is_err());
        assert!(parse_group_spec(":10:dm").is_err());

        let timeout = parse_timeout_spec("ratespace:3:43").unwrap();
        assert_eq!((timeout.dimension, timeout.channel), (3, 43));
        assert!(parse_timeout_spec("ratespace:3").is_err());
        assert!(parse_timeout_spec("ratespace:x:1").is_err());

        assert_eq!(parse_cutoff_override("mapel=13").unwrap(), ("mapel".to_string(), 13));
        assert!(parse_cutoff_override("mapel").is_err());
        assert!(parse_cutoff_override("=3").is_err());
    }
}
