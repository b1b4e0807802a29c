//! Number of builds triggered per imported changelist

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::{Build, PipelineId};
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{CollectError, Metric};

/// Build meta data key holding the changelist a build was started for
pub const CHANGELIST_META_DATA_KEY: &str = "PiperOrigin-RevId";

/// Changelist number of a build, `None` for builds not started by an import
pub fn changelist(build: &Build) -> Result<Option<i64>, CollectError> {
    let Some(value) = build.meta_data.get(CHANGELIST_META_DATA_KEY) else {
        return Ok(None);
    };
    let number = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.map(Some).ok_or_else(|| {
        CollectError::InvalidData(format!(
            "Meta data of build {}: '{}' is not a valid changelist number",
            build.number, value
        ))
    })
}

pub struct BuildsPerChange {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    builds: usize,
    columns: Vec<Column>,
}

impl BuildsPerChange {
    pub fn new(provider: Arc<dyn BuildProvider>, builds: usize, pipelines: Vec<PipelineId>) -> Self {
        Self {
            provider,
            pipelines,
            builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::key("changelist", ColumnKind::Integer),
                Column::value("builds", ColumnKind::Integer),
            ],
        }
    }
}

#[async_trait]
impl Metric for BuildsPerChange {
    fn name(&self) -> &str {
        "builds_per_change"
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn collect(&self) -> Result<DataSet, CollectError> {
        let mut result = DataSet::new(&self.columns);

        for pipeline in &self.pipelines {
            let builds = self
                .provider
                .most_recent_builds(pipeline, self.builds)
                .await
                .map_err(|e| CollectError::provider(format!("builds for pipeline {}", pipeline), e))?;

            let mut per_change: BTreeMap<i64, usize> = BTreeMap::new();
            for build in &builds {
                if let Some(change) = changelist(build)? {
                    *per_change.entry(change).or_default() += 1;
                }
            }

            for (change, count) in per_change {
                result.add_row(vec![
                    Value::from(pipeline.org.as_str()),
                    Value::from(pipeline.slug.as_str()),
                    Value::from(change),
                    Value::from(count),
                ])?;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{FakeProvider, finished_build};
    use serde_json::json;
    use std::collections::HashMap;

    fn build_for(number: i64, change: Option<serde_json::Value>) -> Build {
        let mut meta_data = HashMap::new();
        if let Some(change) = change {
            meta_data.insert(CHANGELIST_META_DATA_KEY.to_string(), change);
        }
        Build {
            meta_data,
            ..finished_build(number, Vec::new())
        }
    }

    #[tokio::test]
    async fn test_counts_builds_per_changelist() {
        let builds = vec![
            build_for(4, Some(json!("200"))),
            build_for(3, Some(json!(100))),
            build_for(2, None),
            build_for(1, Some(json!("100"))),
        ];
        let provider = Arc::new(FakeProvider::with_builds("org/pipeline", builds));
        let metric = BuildsPerChange::new(provider, 500, vec![PipelineId::new("org", "pipeline")]);

        let data = metric.collect().await.unwrap();

        assert_eq!(
            data.to_csv_lines(),
            vec!["org;pipeline;100;2", "org;pipeline;200;1"]
        );
    }

    #[test]
    fn test_invalid_changelist_is_an_error() {
        let build = build_for(9, Some(json!("abc")));
        let err = changelist(&build).unwrap_err();
        assert!(err.to_string().contains("build 9"));
    }
}
