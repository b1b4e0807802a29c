//! Jobs waiting for and running on each platform
//!
//! Only jobs that exist but have not finished count. Jobs in the "scheduled"
//! or "runnable" state wait for a worker; "waiting" jobs wait for other jobs
//! and do not indicate a worker shortage.

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::domain::PipelineId;
use pulse_core::{Clock, Column, ColumnKind, DataSet, SystemClock, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::common::platform_from_agent_query_rules;
use super::{CollectError, Metric, Retention};

#[derive(Debug, Default, Clone, Copy)]
struct Load {
    waiting: usize,
    running: usize,
}

pub struct PlatformLoad {
    provider: Arc<dyn BuildProvider>,
    clock: Arc<dyn Clock>,
    orgs: Vec<String>,
    builds: usize,
    columns: Vec<Column>,
}

impl PlatformLoad {
    pub fn new(provider: Arc<dyn BuildProvider>, builds: usize, orgs: Vec<String>) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock), builds, orgs)
    }

    pub fn with_clock(
        provider: Arc<dyn BuildProvider>,
        clock: Arc<dyn Clock>,
        builds: usize,
        orgs: Vec<String>,
    ) -> Self {
        Self {
            provider,
            clock,
            orgs,
            builds,
            columns: vec![
                Column::key("timestamp", ColumnKind::Timestamp),
                Column::key("org", ColumnKind::Text),
                Column::key("platform", ColumnKind::Text),
                Column::value("waiting_jobs", ColumnKind::Integer),
                Column::value("running_jobs", ColumnKind::Integer),
                Column::value("required_workers", ColumnKind::Integer),
            ],
        }
    }
}

#[async_trait]
impl Metric for PlatformLoad {
    fn name(&self) -> &str {
        "platform_load"
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn retention(&self) -> Option<Retention> {
        Some(Retention::time_window(Duration::from_secs(2 * 24 * 60 * 60)))
    }

    async fn collect(&self) -> Result<DataSet, CollectError> {
        let timestamp = self.clock.current_time();
        let mut result = DataSet::new(&self.columns);

        for org in &self.orgs {
            let builds = self
                .provider
                .most_recent_builds(&PipelineId::all_of(org.as_str()), self.builds)
                .await
                .map_err(|e| CollectError::provider(format!("builds of organization {}", org), e))?;

            let mut load: BTreeMap<String, Load> = BTreeMap::new();
            for job in builds.iter().flat_map(|b| &b.jobs) {
                // The queue names the worker OS; job names would report "rbe" for remote builds
                let Some(platform) = platform_from_agent_query_rules(&job.agent_query_rules) else {
                    continue;
                };
                if job.created_at.is_none() || job.finished_at.is_some() {
                    continue;
                }

                let entry = load.entry(platform).or_default();
                match job.state.as_deref() {
                    Some("running") => entry.running += 1,
                    Some("scheduled") | Some("runnable") => entry.waiting += 1,
                    _ => {}
                }
            }

            for (platform, load) in load {
                result.add_row(vec![
                    Value::from(timestamp),
                    Value::from(org.as_str()),
                    Value::from(platform),
                    Value::from(load.waiting),
                    Value::from(load.running),
                    Value::from(load.waiting + load.running),
                ])?;
            }
        }

        Ok(result)
    }
}
