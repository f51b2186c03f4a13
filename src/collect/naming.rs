//! Job file naming convention
//!
//! Workers name their output `{tag}_dim{D}_cidx{C}_{rest}`, e.g.
//! `tin_dim3_cidx5_prec0.01.mp`. Anything else in the scanned tree is not a
//! job file and is ignored.

use crate::store::JobCoordinates;

/// Parsed job file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFileName {
    pub tag: String,
    pub dimension: usize,
    pub channel_index: usize,
}

impl JobFileName {
    /// Parse a bare file name (no directory components)
    pub fn parse(name: &str) -> Option<Self> {
        let (tag, rest) = name.split_once("_dim")?;
        if tag.is_empty() {
            return None;
        }

        let (dimension, rest) = leading_number(rest)?;
        let rest = rest.strip_prefix("_cidx")?;
        let (channel_index, rest) = leading_number(rest)?;
        rest.strip_prefix('_')?;

        Some(Self {
            tag: tag.to_string(),
            dimension,
            channel_index,
        })
    }

    pub fn coordinates(&self) -> JobCoordinates {
        JobCoordinates::new(self.dimension, self.channel_index)
    }

    /// Canonical file name for a job, `suffix` being the free-form tail
    pub fn format(tag: &str, coordinates: JobCoordinates, suffix: &str) -> String {
        format!(
            "{}_dim{}_cidx{}_{}",
            tag, coordinates.dimension, coordinates.channel_index, suffix
        )
    }
}

/// Split leading ASCII digits off `s`
fn leading_number(s: &str) -> Option<(usize, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}
