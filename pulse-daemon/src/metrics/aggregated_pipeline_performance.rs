//! Whole-build duration and result

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::PipelineId;
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::sync::Arc;
use tracing::warn;

use super::common::duration;
use super::{CollectError, Metric, Retention};

pub struct AggregatedPipelinePerformance {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    last_n_builds: usize,
    columns: Vec<Column>,
}

impl AggregatedPipelinePerformance {
    pub fn new(provider: Arc<dyn BuildProvider>, last_n_builds: usize, pipelines: Vec<PipelineId>) -> Self {
        Self {
            provider,
            pipelines,
            last_n_builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::key("build", ColumnKind::Integer),
                Column::value("result", ColumnKind::Text),
                Column::value("total_time_seconds", ColumnKind::Float),
                Column::value("skipped_tasks", ColumnKind::Text),
            ],
        }
    }
}

#[async_trait]
impl Metric for AggregatedPipelinePerformance {
    fn name(&self) -> &str {
        "aggregated_pipeline_performance"
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn retention(&self) -> Option<Retention> {
        Some(Retention::builds(100))
    }

    async fn collect(&self) -> Result<DataSet, CollectError> {
        let mut result = DataSet::new(&self.columns);

        for pipeline in &self.pipelines {
            let builds = self
                .provider
                .most_recent_builds(pipeline, self.last_n_builds)
                .await
                .map_err(|e| CollectError::provider(format!("builds for pipeline {}", pipeline), e))?;

            for build in builds.iter().filter(|b| b.is_finished()) {
                let total = match duration(build.scheduled_at, build.finished_at) {
                    Ok(total) => total,
                    Err(e) => {
                        warn!("Skipping build {} of {}: {}", build.number, pipeline, e);
                        continue;
                    }
                };

                result.add_row(vec![
                    Value::from(pipeline.org.as_str()),
                    Value::from(pipeline.slug.as_str()),
                    Value::from(build.number),
                    Value::from(build.state.clone()),
                    total,
                    Value::from(build.skipped_tasks()),
                ])?;
            }
        }

        Ok(result)
    }
}
