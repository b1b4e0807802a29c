//! Per-platform result of recent builds

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::{Build, PipelineId};
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::platform_from_job_name;
use super::{CollectError, Metric};

/// Platforms reported as their own column, in column order
pub const PLATFORMS: [&str; 4] = ["linux", "macos", "windows", "rbe"];

/// Merged result of all jobs of one platform; the greater state wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlatformState {
    Passed,
    Failed,
    Canceled,
}

impl PlatformState {
    fn parse(state: &str) -> Option<Self> {
        match state {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Outcome of one build, split by platform
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub number: i64,
    pub platforms: BTreeMap<&'static str, PlatformState>,
}

/// Per-platform states of a build whose jobs all ended
///
/// `None` while any named job is still pending or running, or ended in a
/// state other than passed, failed or canceled. Wait steps have no name and
/// are ignored.
pub fn build_result(build: &Build) -> Option<BuildResult> {
    let mut platforms = BTreeMap::new();
    for job in &build.jobs {
        let Some(name) = job.name.as_deref() else {
            continue;
        };
        let state = PlatformState::parse(job.state.as_deref()?)?;
        if let Some(platform) = platform_from_job_name(name) {
            platforms
                .entry(platform)
                .and_modify(|merged: &mut PlatformState| *merged = (*merged).max(state))
                .or_insert(state);
        }
    }
    Some(BuildResult {
        number: build.number,
        platforms,
    })
}

/// Results of the most recent builds of every pipeline
pub async fn collect_build_results(
    provider: &dyn BuildProvider,
    pipelines: &[PipelineId],
    builds: usize,
) -> Result<Vec<(PipelineId, BuildResult)>, CollectError> {
    let mut results = Vec::new();
    for pipeline in pipelines {
        let recent = provider
            .most_recent_builds(pipeline, builds)
            .await
            .map_err(|e| CollectError::provider(format!("builds for pipeline {}", pipeline), e))?;
        results.extend(
            recent
                .iter()
                .filter_map(build_result)
                .map(|result| (pipeline.clone(), result)),
        );
    }
    Ok(results)
}

pub struct BuildSuccess {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    builds: usize,
    columns: Vec<Column>,
}

impl BuildSuccess {
    pub fn new(provider: Arc<dyn BuildProvider>, builds: usize, pipelines: Vec<PipelineId>) -> Self {
        let mut columns = vec![
            Column::key("org", ColumnKind::Text),
            Column::key("pipeline", ColumnKind::Text),
            Column::key("build", ColumnKind::Integer),
        ];
        columns.extend(PLATFORMS.iter().map(|p| Column::value(*p, ColumnKind::Text)));
        Self {
            provider,
            pipelines,
            builds,
            columns,
        }
    }
}

#[async_trait]
impl Metric for BuildSuccess {
    fn name(&self) -> &str {
        "build_success"
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn collect(&self) -> Result<DataSet, CollectError> {
        let mut result = DataSet::new(&self.columns);

        for (pipeline, build) in
            collect_build_results(self.provider.as_ref(), &self.pipelines, self.builds).await?
        {
            let mut row = vec![
                Value::from(pipeline.org.as_str()),
                Value::from(pipeline.slug.as_str()),
                Value::from(build.number),
            ];
            row.extend(PLATFORMS.iter().map(|platform| {
                build
                    .platforms
                    .get(platform)
                    .map_or(Value::Null, |state| Value::from(state.as_str()))
            }));
            result.add_row(row)?;
        }

        Ok(result)
    }
}
