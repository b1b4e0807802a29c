//! One metric with its interval and publishers

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::status::{MetricStatus, StatusBoard};
use super::{ErrorHandler, SchedulerError};
use crate::metrics::Metric;
use crate::publishers::Publisher;

pub struct MetricJob {
    metric: Arc<dyn Metric>,
    interval: Duration,
    publishers: Vec<Arc<dyn Publisher>>,
}

impl MetricJob {
    pub fn new(metric: Arc<dyn Metric>, interval: Duration, publishers: Vec<Arc<dyn Publisher>>) -> Self {
        Self {
            metric,
            interval,
            publishers,
        }
    }

    pub fn name(&self) -> &str {
        self.metric.name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn status(&self) -> MetricStatus {
        MetricStatus {
            name: self.name().to_string(),
            interval_seconds: self.interval.as_secs(),
            publishers: self.publishers.iter().map(|p| p.name().to_string()).collect(),
            retention: self.metric.retention(),
            runs: 0,
            failures: 0,
            last_run_at: None,
            last_error: None,
        }
    }

    /// Registers the metric with every publisher, in order
    ///
    /// Stops at the first publisher that refuses it.
    pub async fn initialize(&self) -> Result<(), SchedulerError> {
        for publisher in &self.publishers {
            debug!("Registering metric {} with {}", self.name(), publisher.name());
            publisher
                .register_metric(self.metric.as_ref())
                .await
                .map_err(|source| SchedulerError::RegistrationFailed {
                    publisher: publisher.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Collects once and hands the data set to each publisher in order
    ///
    /// Every failure goes to `handler`; a failing publisher does not keep the
    /// data from the publishers after it.
    pub async fn run(&self, handler: &ErrorHandler, status: &StatusBoard) {
        let name = self.name();
        let started_at = Utc::now();

        info!("Collecting data for metric {}", name);
        let data = match self.metric.collect().await {
            Ok(data) => data,
            Err(e) => {
                let err = SchedulerError::CollectionFailed(e);
                handler(name, &err);
                status.record_run(name, started_at, Some(err.to_string()));
                return;
            }
        };

        let mut errors = Vec::new();
        for publisher in &self.publishers {
            info!("Publishing data for metric {} to {}", name, publisher.name());
            if let Err(source) = publisher.publish(self.metric.as_ref(), &data).await {
                let err = SchedulerError::PublishFailed {
                    publisher: publisher.name().to_string(),
                    source,
                };
                handler(name, &err);
                errors.push(err.to_string());
            }
        }

        let error = (!errors.is_empty()).then(|| errors.join("; "));
        status.record_run(name, started_at, error);
    }
}
