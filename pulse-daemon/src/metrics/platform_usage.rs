//! Worker time spent per platform and build

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::PipelineId;
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::collections::BTreeMap;
use pulse_core::timing::{MISSING_TIMESTAMP, difference_seconds};
use std::sync::Arc;
use tracing::warn;

use super::common::platform_for_job;
use super::{CollectError, Metric, Retention};

pub struct PlatformUsage {
    provider: Arc<dyn BuildProvider>,
    orgs: Vec<String>,
    builds: usize,
    columns: Vec<Column>,
}

impl PlatformUsage {
    pub fn new(provider: Arc<dyn BuildProvider>, builds: usize, orgs: Vec<String>) -> Self {
        Self {
            provider,
            orgs,
            builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::key("build", ColumnKind::Integer),
                Column::key("platform", ColumnKind::Text),
                Column::value("usage_seconds", ColumnKind::Float),
            ],
        }
    }
}

#[async_trait]
impl Metric for PlatformUsage {
    fn name(&self) -> &str {
        "platform_usage"
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn retention(&self) -> Option<Retention> {
        Some(Retention::builds(100))
    }

    async fn collect(&self) -> Result<DataSet, CollectError> {
        let mut result = DataSet::new(&self.columns);

        for org in &self.orgs {
            let builds = self
                .provider
                .most_recent_builds(&PipelineId::all_of(org.as_str()), self.builds)
                .await
                .map_err(|e| CollectError::provider(format!("builds of organization {}", org), e))?;

            // Several jobs of one build may share a platform; their usage adds up
            let mut usage: BTreeMap<(&str, i64, String), f64> = BTreeMap::new();
            for build in &builds {
                let Some(pipeline) = build.pipeline_slug() else {
                    continue;
                };
                for job in &build.jobs {
                    let Some(platform) = platform_for_job(job) else {
                        continue;
                    };
                    match difference_seconds(job.started_at, job.finished_at) {
                        Ok(seconds) if seconds == MISSING_TIMESTAMP => {}
                        Ok(seconds) => {
                            *usage.entry((pipeline, build.number, platform)).or_default() += seconds;
                        }
                        Err(e) => warn!(
                            "Skipping job {} of build {} in {}/{}: {}",
                            job.id, build.number, org, pipeline, e
                        ),
                    }
                }
            }

            for ((pipeline, build, platform), seconds) in usage {
                result.add_row(vec![
                    Value::from(org.as_str()),
                    Value::from(pipeline),
                    Value::from(build),
                    Value::from(platform),
                    Value::from(seconds),
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
    use pulse_core::domain::{Build, Job, PipelineRef};

    fn build_of(pipeline: &str, number: i64, jobs: Vec<Job>) -> Build {
        Build {
            pipeline: Some(PipelineRef {
                slug: Some(pipeline.to_string()),
                name: None,
            }),
            ..finished_build(number, jobs)
        }
    }

    #[tokio::test]
    async fn test_usage_per_platform() {
        let builds = vec![
            build_of(
                "bazel",
                10,
                vec![
                    finished_job(":ubuntu: 20.04", 0, 0, 30),
                    finished_job(":ubuntu: 22.04", 0, 5, 15),
                    finished_job(":darwin: macOS", 0, 0, 40),
                    finished_job("Buildifier", 0, 0, 5),
                ],
            ),
            build_of("rules_go", 3, vec![finished_job(":windows:", 0, 10, 5)]),
            Build {
                pipeline: None,
                ..finished_build(4, vec![finished_job(":ubuntu:", 0, 0, 1)])
            },
        ];
        let provider = Arc::new(FakeProvider::with_builds("my-org/all", builds));
        let metric = PlatformUsage::new(provider.clone(), 100, vec!["my-org".to_string()]);

        let data = metric.collect().await.unwrap();

        let rows: Vec<String> = data.to_csv_lines();
        assert_eq!(
            rows,
            vec![
                "my-org;bazel;10;linux;40",
                "my-org;bazel;10;macos;40",
            ]
        );
        assert_eq!(
            *provider.requests.lock().unwrap(),
            vec![("my-org/all".to_string(), 100)]
        );
    }
}
