//! Conflict-resolution policy
//!
//! Ranks sources per field. Rank 0 is the most authoritative. The policy carries
//! a version string that is stamped on every change report, so a fused value
//! can always be traced back to the ranking that produced it.

use crate::types::{PropertyField, SourceKind};
use leadfuse_common::config::PolicyConfig;
use leadfuse_common::{Error, Result};
use std::collections::BTreeMap;

/// Version of the built-in policy
pub const DEFAULT_POLICY_VERSION: &str = "builtin-1";

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResolutionPolicy {
    version: String,
    ranking: Vec<SourceKind>,
    field_overrides: BTreeMap<PropertyField, Vec<SourceKind>>,
    max_magnitude_ratio: f64,
}

impl Default for ConflictResolutionPolicy {
    /// enrichment-provider > record-feed > auction-site > listing-site > manual
    fn default() -> Self {
        Self {
            version: DEFAULT_POLICY_VERSION.to_string(),
            ranking: SourceKind::ALL.to_vec(),
            field_overrides: BTreeMap::new(),
            max_magnitude_ratio: 10.0,
        }
    }
}

impl ConflictResolutionPolicy {
    /// Build from the `[policy]` config section
    ///
    /// Sources left out of a ranking are appended in default order, so every
    /// source always has a rank.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        if config.max_magnitude_ratio <= 1.0 {
            return Err(Error::Config(
                "policy.max_magnitude_ratio must be greater than 1".to_string(),
            ));
        }

        let ranking = complete_ranking(parse_sources(&config.source_ranking)?);

        let mut field_overrides = BTreeMap::new();
        for (field_name, sources) in &config.field_overrides {
            let field = PropertyField::ALL
                .into_iter()
                .find(|f| f.as_str() == field_name.as_str())
                .ok_or_else(|| {
                    Error::Config(format!("policy.field_overrides: unknown field '{}'", field_name))
                })?;
            field_overrides.insert(field, complete_ranking(parse_sources(sources)?));
        }

        Ok(Self {
            version: config.version.clone(),
            ranking,
            field_overrides,
            max_magnitude_ratio: config.max_magnitude_ratio,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn max_magnitude_ratio(&self) -> f64 {
        self.max_magnitude_ratio
    }

    /// Ranking that applies to `field`, highest priority first
    pub fn ranking_for(&self, field: PropertyField) -> &[SourceKind] {
        self.field_overrides
            .get(&field)
            .map(Vec::as_slice)
            .unwrap_or(&self.ranking)
    }

    /// Position of `source` in the ranking for `field` (0 = most trusted)
    pub fn rank(&self, field: PropertyField, source: SourceKind) -> usize {
        self.ranking_for(field)
            .iter()
            .position(|s| *s == source)
            .unwrap_or(usize::MAX)
    }

    /// Rank under the default ranking, used for ordering whole observations
    pub fn source_rank(&self, source: SourceKind) -> usize {
        self.ranking
            .iter()
            .position(|s| *s == source)
            .unwrap_or(usize::MAX)
    }
}

fn parse_sources(names: &[String]) -> Result<Vec<SourceKind>> {
    names
        .iter()
        .map(|name| name.parse::<SourceKind>().map_err(Error::Config))
        .collect()
}

fn complete_ranking(mut ranking: Vec<SourceKind>) -> Vec<SourceKind> {
    let mut seen = Vec::with_capacity(SourceKind::ALL.len());
    ranking.retain(|s| {
        if seen.contains(s) {
            false
        } else {
            seen.push(*s);
            true
        }
    });
    for source in SourceKind::ALL {
        if !ranking.contains(&source) {
            ranking.push(source);
        }
    }
    ranking
}
