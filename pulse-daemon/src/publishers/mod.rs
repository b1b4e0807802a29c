//! Publishers
//!
//! A publisher receives every data set of the metrics it is attached to.
//! `register_metric` runs once before the first publish and prepares
//! whatever the destination needs (tables, statements).

mod devnull;
mod postgres;
mod stdout;
mod time_series;

pub use devnull::DevNullPublisher;
pub use postgres::PostgresPublisher;
pub use stdout::{OutputFormat, StdoutPublisher};
pub use time_series::TimeSeriesPublisher;

use async_trait::async_trait;
use pulse_client::ClientError;
use pulse_core::{DataError, DataSet};
use thiserror::Error;

use crate::metrics::Metric;
use crate::retention::RetentionError;

/// Errors raised while registering or publishing a metric
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Metric '{0}' has already been registered")]
    AlreadyRegistered(String),

    #[error("Metric '{0}' has not been registered")]
    NotRegistered(String),

    #[error(transparent)]
    InvalidSchema(#[from] DataError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Retention(#[from] RetentionError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for metric data
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Prepares the destination for `metric`
    async fn register_metric(&self, metric: &dyn Metric) -> Result<(), PublishError>;

    async fn publish(&self, metric: &dyn Metric, data: &DataSet) -> Result<(), PublishError>;
}
