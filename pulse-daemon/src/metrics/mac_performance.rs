//! Wait and run times of macOS jobs
//!
//! Builds told to skip macOS still get one row so that gaps in the data can
//! be told apart from missing collections.

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::{Build, PipelineId};
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::sync::Arc;
use tracing::warn;

use super::common::{duration, platform_from_job_name, shard_from_job_name};
use super::{CollectError, Metric};

const MACOS: &str = "macos";

pub struct MacPerformance {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    builds: usize,
    columns: Vec<Column>,
}

impl MacPerformance {
    pub fn new(provider: Arc<dyn BuildProvider>, builds: usize, pipelines: Vec<PipelineId>) -> Self {
        Self {
            provider,
            pipelines,
            builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::key("build", ColumnKind::Integer),
                Column::key("job", ColumnKind::Text),
                Column::value("shard", ColumnKind::Integer),
                Column::value("wait_time_seconds", ColumnKind::Float),
                Column::value("run_time_seconds", ColumnKind::Float),
                Column::value("skipped", ColumnKind::Bool),
            ],
        }
    }

    fn add_build(&self, result: &mut DataSet, pipeline: &PipelineId, build: &Build) -> Result<(), CollectError> {
        let mut rows = 0;

        let mac_jobs = build.jobs.iter().filter(|j| {
            j.is_finished_worker_task() && j.name.as_deref().and_then(platform_from_job_name) == Some(MACOS)
        });
        for job in mac_jobs {
            let name = job.name.as_deref().unwrap_or_default();
            let times = duration(job.runnable_at, job.started_at)
                .and_then(|wait| Ok((wait, duration(job.started_at, job.finished_at)?)));
            let (wait, run) = match times {
                Ok(times) => times,
                Err(e) => {
                    warn!("Skipping job {} of build {} in {}: {}", job.id, build.number, pipeline, e);
                    continue;
                }
            };

            result.add_row(vec![
                Value::from(pipeline.org.as_str()),
                Value::from(pipeline.slug.as_str()),
                Value::from(build.number),
                Value::from(name),
                Value::from(shard_from_job_name(name)),
                wait,
                run,
                Value::from(false),
            ])?;
            rows += 1;
        }

        if rows == 0 && build.skipped_tasks().split(',').any(|task| task.trim() == MACOS) {
            result.add_row(vec![
                Value::from(pipeline.org.as_str()),
                Value::from(pipeline.slug.as_str()),
                Value::from(build.number),
                Value::from(""),
                Value::Integer(0),
                Value::Null,
                Value::Null,
                Value::from(true),
            ])?;
        }
        Ok(())
    }
}

#[async_trait]
impl Metric for MacPerformance {
    fn name(&self) -> &str {
        "mac_performance"
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

            for build in &builds {
                self.add_build(&mut result, pipeline, build)?;
            }
        }

        Ok(result)
    }
}
