//! Publisher writing numeric columns to the time-series store

use async_trait::async_trait;
use pulse_client::TimeSeriesClient;
use pulse_core::DataSet;
use tracing::{debug, info};

use super::{PublishError, Publisher};
use crate::metrics::Metric;

pub struct TimeSeriesPublisher {
    client: TimeSeriesClient,
}

impl TimeSeriesPublisher {
    pub fn new(client: TimeSeriesClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Publisher for TimeSeriesPublisher {
    fn name(&self) -> &str {
        "TimeSeries"
    }

    async fn register_metric(&self, _metric: &dyn Metric) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, metric: &dyn Metric, data: &DataSet) -> Result<(), PublishError> {
        let points = data.time_series(metric.name());
        if points.is_empty() {
            info!("Metric {} has no time series data, skipping", metric.name());
            return Ok(());
        }

        self.client.write_points(&points).await?;
        debug!("Wrote {} points of metric {}", points.len(), metric.name());
        Ok(())
    }
}
