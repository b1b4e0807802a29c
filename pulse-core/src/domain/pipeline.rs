//! Pipeline identity

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::DataError;

/// Slug that selects every build of an organization instead of one pipeline
pub const ALL_PIPELINES: &str = "all";

/// (organization, pipeline slug) pair
///
/// Used as the cache key for build lookups and as the leading part of the
/// primary key of build based tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineId {
    pub org: String,
    pub slug: String,
}

impl PipelineId {
    pub fn new(org: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            slug: slug.into(),
        }
    }

    /// Pseudo pipeline covering all builds of `org`
    pub fn all_of(org: impl Into<String>) -> Self {
        Self::new(org, ALL_PIPELINES)
    }

    /// Whether this id stands for the whole organization
    pub fn is_all(&self) -> bool {
        self.slug == ALL_PIPELINES
    }
}

impl Ord for PipelineId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.slug
            .cmp(&other.slug)
            .then_with(|| self.org.cmp(&other.org))
    }
}

impl PartialOrd for PipelineId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.slug)
    }
}

impl FromStr for PipelineId {
    type Err = DataError;

    /// Parses `org/slug`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(slug), None) if !org.is_empty() && !slug.is_empty() => {
                Ok(Self::new(org, slug))
            }
            _ => Err(DataError::InvalidPipelineId(s.to_string())),
        }
    }
}

/// Pipeline reference embedded in a build record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRef {
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pipeline_id() {
        let id: PipelineId = "bazel/bazel-postsubmit".parse().unwrap();
        assert_eq!(id.org, "bazel");
        assert_eq!(id.slug, "bazel-postsubmit");
        assert_eq!(id.to_string(), "bazel/bazel-postsubmit");
    }

    #[test]
    fn test_parse_pipeline_id_invalid() {
        assert!("no-separator".parse::<PipelineId>().is_err());
        assert!("a/b/c".parse::<PipelineId>().is_err());
        assert!("/slug".parse::<PipelineId>().is_err());
        assert!("org/".parse::<PipelineId>().is_err());
    }

    #[test]
    fn test_ordering_is_by_slug() {
        let mut ids = vec![
            PipelineId::new("a", "zeta"),
            PipelineId::new("z", "alpha"),
            PipelineId::new("b", "alpha"),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                PipelineId::new("b", "alpha"),
                PipelineId::new("z", "alpha"),
                PipelineId::new("a", "zeta"),
            ]
        );
    }

    #[test]
    fn test_all_pipelines() {
        let id = PipelineId::all_of("bazel");
        assert!(id.is_all());
        assert!(!PipelineId::new("bazel", "bazel").is_all());
    }
}
