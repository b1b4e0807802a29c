//! Per-job wait and run times

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::PipelineId;
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::sync::Arc;
use tracing::warn;

use super::common::duration;
use super::{CollectError, Metric, Retention};

pub struct PipelinePerformance {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    last_n_builds: usize,
    columns: Vec<Column>,
}

impl PipelinePerformance {
    pub fn new(provider: Arc<dyn BuildProvider>, last_n_builds: usize, pipelines: Vec<PipelineId>) -> Self {
        Self {
            provider,
            pipelines,
            last_n_builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::key("build", ColumnKind::Integer),
                Column::key("job", ColumnKind::Text),
                Column::value("creation_time", ColumnKind::Timestamp),
                Column::value("wait_time_seconds", ColumnKind::Float),
                Column::value("run_time_seconds", ColumnKind::Float),
                Column::value("skipped_tasks", ColumnKind::Text),
            ],
        }
    }
}

#[async_trait]
impl Metric for PipelinePerformance {
    fn name(&self) -> &str {
        "pipeline_performance"
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

            for build in &builds {
                let skipped_tasks = build.skipped_tasks();

                for job in build.jobs.iter().filter(|j| j.is_finished_worker_task()) {
                    let times = duration(job.runnable_at, job.started_at)
                        .and_then(|wait| Ok((wait, duration(job.started_at, job.finished_at)?)));
                    let (wait, run) = match times {
                        Ok(times) => times,
                        Err(e) => {
                            warn!(
                                "Skipping job {} of build {} in {}: {}",
                                job.id, build.number, pipeline, e
                            );
                            continue;
                        }
                    };

                    result.add_row(vec![
                        Value::from(pipeline.org.as_str()),
                        Value::from(pipeline.slug.as_str()),
                        Value::from(build.number),
                        Value::from(job.name.clone()),
                        Value::from(job.runnable_at),
                        wait,
                        run,
                        Value::from(skipped_tasks.as_str()),
                    ])?;
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{FakeProvider, at, finished_build, finished_job};
    use pulse_core::domain::Job;

    #[tokio::test]
    async fn test_one_row_per_finished_job() {
        let mut build = finished_build(
            7,
            vec![
                finished_job("compile", 0, 4, 10),
                // Wait step
                Job::default(),
                // Cancelled before an agent picked it up
                Job {
                    started_at: None,
                    ..finished_job("cancelled", 0, 0, 3)
                },
            ],
        );
        build
            .env
            .insert("CI_SKIP_TASKS".to_string(), serde_json::json!("windows"));

        let provider = Arc::new(FakeProvider::with_builds("org/pipeline", vec![build]));
        let metric = PipelinePerformance::new(provider, 20, vec![PipelineId::new("org", "pipeline")]);

        let data = metric.collect().await.unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(
            data.rows()[0],
            vec![
                Value::from("org"),
                Value::from("pipeline"),
                Value::Integer(7),
                Value::from("compile"),
                Value::Timestamp(at(0)),
                Value::Float(4.0),
                Value::Float(6.0),
                Value::from("windows"),
            ]
        );
        assert_eq!(data.rows()[1][5], Value::Null);
        assert_eq!(data.rows()[1][6], Value::Null);
    }

    #[tokio::test]
    async fn test_skewed_job_is_skipped() {
        let build = finished_build(
            1,
            vec![finished_job("skewed", 10, 5, 20), finished_job("ok", 0, 1, 2)],
        );
        let provider = Arc::new(FakeProvider::with_builds("org/pipeline", vec![build]));
        let metric = PipelinePerformance::new(provider, 20, vec![PipelineId::new("org", "pipeline")]);

        let data = metric.collect().await.unwrap();

        assert_eq!(data.len(), 1);
        assert_eq!(data.rows()[0][3], Value::from("ok"));
    }
}
