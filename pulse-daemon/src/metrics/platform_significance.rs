//! Which platform breaks a pipeline
//!
//! Classifies recent builds by outcome and counts failures that happened on
//! exactly one platform separately from failures on several.

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::PipelineId;
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::build_success::{BuildResult, PlatformState, collect_build_results};
use super::{CollectError, Metric};

#[derive(Debug, Default, Clone, PartialEq)]
struct PipelineStats {
    total: usize,
    passing: usize,
    canceled: usize,
    setup_failed: usize,
    linux_failures: usize,
    macos_failures: usize,
    windows_failures: usize,
    rbe_failures: usize,
    multi_platform_failures: usize,
}

impl PipelineStats {
    fn add(&mut self, pipeline: &PipelineId, build: &BuildResult) {
        self.total += 1;
        let states = &build.platforms;

        // No platform job at all: the setup step failed or was canceled
        if states.is_empty() {
            self.setup_failed += 1;
            return;
        }
        if states.values().any(|s| *s == PlatformState::Canceled) {
            self.canceled += 1;
            return;
        }

        let failed: Vec<&str> = states
            .iter()
            .filter(|(_, s)| **s == PlatformState::Failed)
            .map(|(p, _)| *p)
            .collect();
        match failed.as_slice() {
            [] => self.passing += 1,
            [platform] => {
                debug!("{} only failure: {}/{}", platform, pipeline, build.number);
                match *platform {
                    "linux" => self.linux_failures += 1,
                    "macos" => self.macos_failures += 1,
                    "windows" => self.windows_failures += 1,
                    "rbe" => self.rbe_failures += 1,
                    _ => {}
                }
            }
            _ => self.multi_platform_failures += 1,
        }
    }
}

pub struct PlatformSignificance {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    builds: usize,
    columns: Vec<Column>,
}

impl PlatformSignificance {
    pub fn new(provider: Arc<dyn BuildProvider>, builds: usize, pipelines: Vec<PipelineId>) -> Self {
        Self {
            provider,
            pipelines,
            builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::value("total_builds", ColumnKind::Integer),
                Column::value("passing_builds", ColumnKind::Integer),
                Column::value("canceled_builds", ColumnKind::Integer),
                Column::value("setup_failed", ColumnKind::Integer),
                Column::value("linux_failures", ColumnKind::Integer),
                Column::value("macos_failures", ColumnKind::Integer),
                Column::value("windows_failures", ColumnKind::Integer),
                Column::value("rbe_failures", ColumnKind::Integer),
                Column::value("multi_platform_failures", ColumnKind::Integer),
            ],
        }
    }
}

#[async_trait]
impl Metric for PlatformSignificance {
    fn name(&self) -> &str {
        "platform_significance"
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    async fn collect(&self) -> Result<DataSet, CollectError> {
        let results = collect_build_results(self.provider.as_ref(), &self.pipelines, self.builds).await?;

        let mut stats: BTreeMap<PipelineId, PipelineStats> = BTreeMap::new();
        for (pipeline, build) in &results {
            stats.entry(pipeline.clone()).or_default().add(pipeline, build);
        }

        let mut result = DataSet::new(&self.columns);
        for (pipeline, s) in stats {
            result.add_row(vec![
                Value::from(pipeline.org.as_str()),
                Value::from(pipeline.slug.as_str()),
                Value::from(s.total),
                Value::from(s.passing),
                Value::from(s.canceled),
                Value::from(s.setup_failed),
                Value::from(s.linux_failures),
                Value::from(s.macos_failures),
                Value::from(s.windows_failures),
                Value::from(s.rbe_failures),
                Value::from(s.multi_platform_failures),
            ])?;
        }
        Ok(result)
    }
}
