//! Configuration validation

use super::*;
use anyhow::Result;
use std::collections::HashSet;

/// Validate what a collection or late-result merge needs
pub fn validate_collect(collect: &CollectConfig) -> Result<()> {
    if collect.num_channels == 0 {
        anyhow::bail!("num_channels must be at least 1");
    }

    if collect.groups.is_empty() {
        anyhow::bail!("at least one collection group is required");
    }

    let mut tags = HashSet::new();
    let mut algorithms = HashSet::new();
    for group in &collect.groups {
        if group.tag.is_empty() || group.tag.contains('/') {
            anyhow::bail!("invalid group tag '{}'", group.tag);
        }
        if !tags.insert(group.tag.as_str()) {
            anyhow::bail!("duplicate group tag '{}'", group.tag);
        }
        if group.max_dimension < 2 {
            anyhow::bail!(
                "group '{}': max_dimension must be at least 2, got {}",
                group.tag,
                group.max_dimension
            );
        }
        if group.algorithms.is_empty() {
            anyhow::bail!("group '{}' names no algorithms", group.tag);
        }
        for algorithm in &group.algorithms {
            if !algorithms.insert(algorithm.as_str()) {
                anyhow::bail!("algorithm '{}' appears in more than one place", algorithm);
            }
        }
    }

    Ok(())
}

/// Validate evaluation settings and the sets they will be applied to
pub fn validate_evaluate(config: &Config) -> Result<()> {
    let evaluate = &config.evaluate;
    let sets = config.evaluation_sets();
    if sets.iter().all(|set| set.algorithms.is_empty()) {
        anyhow::bail!("no algorithms to evaluate: list them under [evaluate] or configure collection groups");
    }

    let mut evaluated = HashSet::new();
    for set in &sets {
        let mut seen = HashSet::new();
        for algorithm in &set.algorithms {
            if !seen.insert(algorithm.as_str()) {
                anyhow::bail!("duplicate algorithm '{}' in evaluation", algorithm);
            }
            evaluated.insert(algorithm.as_str());
        }
    }

    // An explicit list must stay within one collection group
    let tags: Vec<&str> = config
        .collect
        .groups
        .iter()
        .filter(|g| g.algorithms.iter().any(|a| evaluate.algorithms.contains(a)))
        .map(|g| g.tag.as_str())
        .collect();
    if tags.len() > 1 {
        anyhow::bail!(
            "evaluated algorithms span collection groups {}; evaluate one group at a time",
            tags.join(", ")
        );
    }

    if !evaluate.objective_tolerance.is_finite() || evaluate.objective_tolerance < 0.0 {
        anyhow::bail!(
            "objective_tolerance must be a non-negative number, got {}",
            evaluate.objective_tolerance
        );
    }

    if !evaluate.censor_seconds.is_finite() || evaluate.censor_seconds <= 0.0 {
        anyhow::bail!("censor_seconds must be positive, got {}", evaluate.censor_seconds);
    }

    for timeout in &evaluate.timeouts {
        if !evaluated.contains(timeout.algorithm.as_str()) {
            anyhow::bail!(
                "timeout entry names algorithm '{}' which is not evaluated",
                timeout.algorithm
            );
        }
        if timeout.dimension == 0 {
            anyhow::bail!(
                "timeout entry for '{}': dimensions are 1-based",
                timeout.algorithm
            );
        }
    }

    Ok(())
}

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_collect(&config.collect)?;
    validate_evaluate(config)?;
    Ok(())
}
