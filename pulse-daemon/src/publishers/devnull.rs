//! Publisher that discards everything

use async_trait::async_trait;
use pulse_core::DataSet;

use super::{PublishError, Publisher};
use crate::metrics::Metric;

#[derive(Debug, Default, Clone, Copy)]
pub struct DevNullPublisher;

#[async_trait]
impl Publisher for DevNullPublisher {
    fn name(&self) -> &str {
        "DevNull"
    }

    async fn register_metric(&self, _metric: &dyn Metric) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, _metric: &dyn Metric, _data: &DataSet) -> Result<(), PublishError> {
        Ok(())
    }
}
