//! Metric collectors
//!
//! A metric owns a fixed column layout and knows how to produce a fresh
//! [`DataSet`] from the CI provider. Its name doubles as the table name in the
//! relational store, so it must be a valid identifier.
//!
//! Metrics that persist history declare a [`Retention`] so the store can
//! reclaim old rows after each publish.

mod aggregated_pipeline_performance;
mod build_success;
mod builds_per_change;
mod common;
mod critical_path;
mod daily_performance;
mod mac_performance;
mod pipeline_performance;
mod platform_load;
mod platform_significance;
mod platform_usage;
mod worker_availability;

pub use aggregated_pipeline_performance::AggregatedPipelinePerformance;
pub use build_success::BuildSuccess;
pub use builds_per_change::BuildsPerChange;
pub use critical_path::CriticalPath;
pub use daily_performance::DailyPerformance;
pub use mac_performance::MacPerformance;
pub use pipeline_performance::PipelinePerformance;
pub use platform_load::PlatformLoad;
pub use platform_significance::PlatformSignificance;
pub use platform_usage::PlatformUsage;
pub use worker_availability::WorkerAvailability;

use async_trait::async_trait;
use pulse_client::ClientError;
use pulse_core::{Column, DataError, DataSet};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while collecting a metric
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Cannot retrieve {what}: {source}")]
    Provider {
        what: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to add row: {0}")]
    Row(#[from] DataError),

    #[error("{0}")]
    InvalidData(String),
}

impl CollectError {
    pub fn provider(what: impl Into<String>, source: ClientError) -> Self {
        Self::Provider {
            what: what.into(),
            source,
        }
    }
}

/// How old rows of a persisted metric are recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionKind {
    /// Rows older than `relevant_delta` seconds before the newest `timestamp`
    TimeWindow,
    /// Rows more than `relevant_delta` builds behind the newest build of their pipeline
    BuildWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Retention {
    pub kind: RetentionKind,
    pub relevant_delta: i64,
}

impl Retention {
    pub fn time_window(window: Duration) -> Self {
        Self {
            kind: RetentionKind::TimeWindow,
            relevant_delta: window.as_secs() as i64,
        }
    }

    pub fn builds(count: i64) -> Self {
        Self {
            kind: RetentionKind::BuildWindow,
            relevant_delta: count,
        }
    }
}

/// A recurring measurement
#[async_trait]
pub trait Metric: Send + Sync {
    /// Identity of the metric, also used as the table name
    fn name(&self) -> &str;

    /// Column layout of every data set this metric produces
    fn columns(&self) -> &[Column];

    /// Retention policy, for metrics whose history is trimmed
    fn retention(&self) -> Option<Retention> {
        None
    }

    /// Collect one data set
    async fn collect(&self) -> Result<DataSet, CollectError>;
}
