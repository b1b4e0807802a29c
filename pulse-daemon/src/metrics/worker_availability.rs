//! Idle and busy agents per platform

use async_trait::async_trait;
use pulse_client::BuildProvider;
use pulse_core::{Clock, Column, ColumnKind, DataSet, SystemClock, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::common::platform_for_host;
use super::{CollectError, Metric, Retention};

pub struct WorkerAvailability {
    provider: Arc<dyn BuildProvider>,
    clock: Arc<dyn Clock>,
    orgs: Vec<String>,
    columns: Vec<Column>,
}

impl WorkerAvailability {
    pub fn new(provider: Arc<dyn BuildProvider>, orgs: Vec<String>) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock), orgs)
    }

    pub fn with_clock(provider: Arc<dyn BuildProvider>, clock: Arc<dyn Clock>, orgs: Vec<String>) -> Self {
        Self {
            provider,
            clock,
            orgs,
            columns: vec![
                Column::key("timestamp", ColumnKind::Timestamp),
                Column::key("org", ColumnKind::Text),
                Column::key("platform", ColumnKind::Text),
                Column::value("idle_count", ColumnKind::Integer),
                Column::value("busy_count", ColumnKind::Integer),
            ],
        }
    }
}

#[async_trait]
impl Metric for WorkerAvailability {
    fn name(&self) -> &str {
        "worker_availability"
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn retention(&self) -> Option<Retention> {
        Some(Retention::time_window(Duration::from_secs(24 * 60 * 60)))
    }

    async fn collect(&self) -> Result<DataSet, CollectError> {
        let timestamp = self.clock.current_time();
        let mut result = DataSet::new(&self.columns);

        for org in &self.orgs {
            let agents = self
                .provider
                .agents(org)
                .await
                .map_err(|e| CollectError::provider(format!("agents of organization {}", org), e))?;

            // (idle, busy) per platform
            let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
            for agent in &agents {
                let platform = platform_for_host(agent.hostname.as_deref().unwrap_or_default())?;
                let entry = counts.entry(platform).or_default();
                if agent.is_busy() {
                    entry.1 += 1;
                } else {
                    entry.0 += 1;
                }
            }

            for (platform, (idle, busy)) in counts {
                result.add_row(vec![
                    Value::from(timestamp),
                    Value::from(org.as_str()),
                    Value::from(platform),
                    Value::from(idle),
                    Value::from(busy),
                ])?;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testing::{FakeProvider, at};
    use pulse_core::ManualClock;
    use pulse_core::domain::Agent;

    fn agent(hostname: &str, busy: bool) -> Agent {
        Agent {
            hostname: Some(hostname.to_string()),
            job: busy.then(|| serde_json::json!({ "id": "j1" })),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_counts_per_platform() {
        let mut provider = FakeProvider::default();
        provider.agents.insert(
            "my-org".to_string(),
            vec![
                agent("bk-docker-a1", true),
                agent("bk-docker-b2", false),
                agent("bk-docker-c3", false),
                agent("bk-windows-x", true),
            ],
        );
        let metric = WorkerAvailability::with_clock(
            Arc::new(provider),
            Arc::new(ManualClock::new(at(0))),
            vec!["my-org".to_string()],
        );

        let data = metric.collect().await.unwrap();

        assert_eq!(
            data.to_csv_lines(),
            vec![
                format!("{};my-org;bk-docker;2;1", at(0).to_rfc3339()),
                format!("{};my-org;bk-windows;0;1", at(0).to_rfc3339()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_host_fails_collection() {
        let mut provider = FakeProvider::default();
        provider
            .agents
            .insert("my-org".to_string(), vec![agent("localhost", false)]);
        let metric = WorkerAvailability::new(Arc::new(provider), vec!["my-org".to_string()]);

        assert!(matches!(
            metric.collect().await,
            Err(CollectError::InvalidData(_))
        ));
    }
}
