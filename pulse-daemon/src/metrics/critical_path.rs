//! Critical path of finished builds
//!
//! Splits each build's wall time into time spent waiting for workers and time
//! with at least one job running, and names the longest task.

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::PipelineId;
use pulse_core::timing::{self, JobInterval};
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::sync::Arc;
use tracing::warn;

use super::{CollectError, Metric, Retention};

pub struct CriticalPath {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    last_n_builds: usize,
    columns: Vec<Column>,
}

impl CriticalPath {
    pub fn new(provider: Arc<dyn BuildProvider>, last_n_builds: usize, pipelines: Vec<PipelineId>) -> Self {
        Self {
            provider,
            pipelines,
            last_n_builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::key("build", ColumnKind::Integer),
                Column::value("wait_time_seconds", ColumnKind::Float),
                Column::value("run_time_seconds", ColumnKind::Float),
                Column::value("longest_task_name", ColumnKind::Text),
                Column::value("longest_task_time_seconds", ColumnKind::Float),
                Column::value("result", ColumnKind::Text),
            ],
        }
    }
}

#[async_trait]
impl Metric for CriticalPath {
    fn name(&self) -> &str {
        "critical_path"
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
                let intervals: Vec<JobInterval> = build.jobs.iter().map(JobInterval::from).collect();

                // The provider only reports the latest attempt of a retried job, so the
                // gap before a manual retry shows up as wait time.
                let performance = match timing::analyze(&intervals) {
                    Ok(performance) => performance,
                    Err(e) => {
                        warn!(
                            "Skipping build {} of {} in critical path: {}",
                            build.number, pipeline, e
                        );
                        continue;
                    }
                };

                let (longest_name, longest_seconds) = match performance.longest_task {
                    Some(task) => (Value::from(task.name), Value::from(task.seconds)),
                    None => (Value::Null, Value::Null),
                };

                result.add_row(vec![
                    Value::from(pipeline.org.as_str()),
                    Value::from(pipeline.slug.as_str()),
                    Value::from(build.number),
                    Value::from(performance.total_wait_seconds),
                    Value::from(performance.total_run_seconds),
                    longest_name,
                    longest_seconds,
                    Value::from(build.state.clone()),
                ])?;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{FakeProvider, finished_build, finished_job};
    use pulse_core::domain::Build;

    #[tokio::test]
    async fn test_collects_wait_and_run_time() {
        let build = finished_build(
            42,
            vec![
                finished_job("lint", 0, 5, 15),
                finished_job("test", 0, 10, 40),
                finished_job("deploy", 50, 60, 70),
            ],
        );
        let provider = Arc::new(FakeProvider::with_builds("org/pipeline", vec![build]));
        let metric = CriticalPath::new(provider, 20, vec![PipelineId::new("org", "pipeline")]);

        let data = metric.collect().await.unwrap();

        assert_eq!(data.len(), 1);
        let row = &data.rows()[0];
        assert_eq!(row[2], Value::Integer(42));
        // Waiting 0-5 and 40-60, running 5-40 and 60-70
        assert_eq!(row[3], Value::Float(25.0));
        assert_eq!(row[4], Value::Float(45.0));
        assert_eq!(row[5], Value::from("test"));
        assert_eq!(row[6], Value::Float(40.0));
        assert_eq!(row[7], Value::from("passed"));
    }

    #[tokio::test]
    async fn test_skips_unfinished_and_inconsistent_builds() {
        let running = Build {
            finished_at: None,
            ..finished_build(3, vec![finished_job("a", 0, 1, 2)])
        };
        let mut stuck_job = finished_job("stuck", 0, 1, 2);
        stuck_job.finished_at = None;
        let inconsistent = finished_build(2, vec![stuck_job]);
        let good = finished_build(1, vec![finished_job("a", 0, 1, 2)]);

        let provider = Arc::new(FakeProvider::with_builds(
            "org/pipeline",
            vec![running, inconsistent, good],
        ));
        let metric = CriticalPath::new(provider, 20, vec![PipelineId::new("org", "pipeline")]);

        let data = metric.collect().await.unwrap();

        assert_eq!(data.len(), 1);
        assert_eq!(data.rows()[0][2], Value::Integer(1));
    }

    #[tokio::test]
    async fn test_provider_failure_names_pipeline() {
        let metric = CriticalPath::new(
            Arc::new(FakeProvider::default()),
            20,
            vec![PipelineId::new("org", "missing")],
        );

        let err = metric.collect().await.unwrap_err();
        assert!(err.to_string().contains("builds for pipeline org/missing"));
    }
}
