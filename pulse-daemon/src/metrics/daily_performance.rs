//! Daily percentiles of passed build durations
//!
//! A build's duration runs from scheduling to finish, so queueing time counts.
//! Builds are bucketed by the UTC day they were scheduled on.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use pulse_client::BuildProvider;
use pulse_core::domain::{Build, PipelineId};
use pulse_core::timing::{MISSING_TIMESTAMP, difference_seconds};
use pulse_core::{Column, ColumnKind, DataSet, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::{CollectError, Metric};

const PERCENTILES: [usize; 4] = [50, 90, 95, 99];

/// Nearest-rank percentile of an ascending, non-empty slice
fn percentile(sorted: &[f64], p: usize) -> f64 {
    sorted[(sorted.len() * p / 100).min(sorted.len() - 1)]
}

pub struct DailyPerformance {
    provider: Arc<dyn BuildProvider>,
    pipelines: Vec<PipelineId>,
    builds: usize,
    columns: Vec<Column>,
}

impl DailyPerformance {
    pub fn new(provider: Arc<dyn BuildProvider>, builds: usize, pipelines: Vec<PipelineId>) -> Self {
        Self {
            provider,
            pipelines,
            builds,
            columns: vec![
                Column::key("org", ColumnKind::Text),
                Column::key("pipeline", ColumnKind::Text),
                Column::key("day", ColumnKind::Timestamp),
                Column::value("passed_builds", ColumnKind::Integer),
                Column::value("median_seconds", ColumnKind::Float),
                Column::value("p90_seconds", ColumnKind::Float),
                Column::value("p95_seconds", ColumnKind::Float),
                Column::value("p99_seconds", ColumnKind::Float),
            ],
        }
    }

    fn durations_by_day(pipeline: &PipelineId, builds: &[Build]) -> BTreeMap<NaiveDate, Vec<f64>> {
        let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for build in builds {
            if build.state.as_deref() != Some("passed") || !build.is_finished() {
                continue;
            }
            let Some(scheduled) = build.scheduled_at else {
                continue;
            };
            match difference_seconds(build.scheduled_at, build.finished_at) {
                Ok(seconds) if seconds == MISSING_TIMESTAMP => {}
                Ok(seconds) => days.entry(scheduled.date_naive()).or_default().push(seconds),
                Err(e) => warn!("Skipping build {} of {}: {}", build.number, pipeline, e),
            }
        }
        days
    }
}

#[async_trait]
impl Metric for DailyPerformance {
    fn name(&self) -> &str {
        "daily_performance"
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

            for (day, mut durations) in Self::durations_by_day(pipeline, &builds) {
                durations.sort_by(f64::total_cmp);

                let mut row = vec![
                    Value::from(pipeline.org.as_str()),
                    Value::from(pipeline.slug.as_str()),
                    Value::from(day.and_time(NaiveTime::MIN).and_utc()),
                    Value::from(durations.len()),
                ];
                row.extend(PERCENTILES.iter().map(|p| Value::Float(percentile(&durations, *p))));
                result.add_row(row)?;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{FakeProvider, at, finished_build};
    use chrono::{TimeDelta, TimeZone, Utc};

    const DAY: i64 = 24 * 60 * 60;

    fn build(number: i64, state: &str, scheduled: i64, finished: i64) -> Build {
        Build {
            state: Some(state.to_string()),
            scheduled_at: Some(at(scheduled)),
            finished_at: Some(at(finished)),
            ..finished_build(number, Vec::new())
        }
    }

    #[test]
    fn test_percentile() {
        let sorted: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 50), 6.0);
        assert_eq!(percentile(&sorted, 90), 10.0);
        assert_eq!(percentile(&sorted, 99), 10.0);
        assert_eq!(percentile(&[7.0], 50), 7.0);
    }

    #[tokio::test]
    async fn test_passed_builds_grouped_by_day() {
        let builds = vec![
            build(6, "passed", DAY, DAY + 300),
            build(5, "passed", 0, 30),
            build(4, "failed", 0, 5000),
            build(3, "passed", 0, 10),
            build(2, "passed", 0, 20),
            // Finished long before it was scheduled
            build(1, "passed", 50, 0),
        ];
        let provider = Arc::new(FakeProvider::with_builds("org/pipeline", builds));
        let metric = DailyPerformance::new(provider, 200, vec![PipelineId::new("org", "pipeline")]);

        let data = metric.collect().await.unwrap();

        assert_eq!(data.len(), 2);
        let first_day = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            data.rows()[0],
            vec![
                Value::from("org"),
                Value::from("pipeline"),
                Value::Timestamp(first_day),
                Value::Integer(3),
                Value::Float(20.0),
                Value::Float(30.0),
                Value::Float(30.0),
                Value::Float(30.0),
            ]
        );
        assert_eq!(data.rows()[1][2], Value::Timestamp(first_day + TimeDelta::days(1)));
        assert_eq!(data.rows()[1][3], Value::Integer(1));
        assert_eq!(data.rows()[1][4], Value::Float(300.0));
    }
}
