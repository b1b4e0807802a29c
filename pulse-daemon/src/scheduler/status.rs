//! Run bookkeeping per metric, served by the status API

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::metrics::Retention;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStatus {
    pub name: String,
    pub interval_seconds: u64,
    pub publishers: Vec<String>,
    pub retention: Option<Retention>,
    pub runs: u64,
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Error of the most recent run, `None` if it succeeded
    pub last_error: Option<String>,
}

/// Shared, thread-safe view of all scheduled metrics
#[derive(Debug, Default)]
pub struct StatusBoard {
    metrics: Mutex<BTreeMap<String, MetricStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, status: MetricStatus) {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.insert(status.name.clone(), status);
    }

    /// Records one finished run; `error` holds every failure of that run
    pub fn record_run(&self, name: &str, at: DateTime<Utc>, error: Option<String>) {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(status) = metrics.get_mut(name) {
            status.runs += 1;
            if error.is_some() {
                status.failures += 1;
            }
            status.last_run_at = Some(at);
            status.last_error = error;
        }
    }

    /// Records a failure that prevented the metric from running at all
    pub fn record_failure(&self, name: &str, error: String) {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(status) = metrics.get_mut(name) {
            status.failures += 1;
            status.last_error = Some(error);
        }
    }

    pub fn get(&self, name: &str) -> Option<MetricStatus> {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.get(name).cloned()
    }

    /// All metrics, ordered by name
    pub fn snapshot(&self) -> Vec<MetricStatus> {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.values().cloned().collect()
    }
}
