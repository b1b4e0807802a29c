//! Time-series store client
//!
//! Writes numeric samples in the Cloud Monitoring `timeSeries.create` format.

use crate::error::{ClientError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use pulse_core::TimeSeriesPoint;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;

/// Upper bound on series per create request accepted by the store
pub const MAX_SERIES_PER_REQUEST: usize = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTimeSeriesRequest<'a> {
    time_series: Vec<TimeSeries<'a>>,
}

#[derive(Debug, Serialize)]
struct TimeSeries<'a> {
    metric: MetricDescriptor<'a>,
    resource: MonitoredResource,
    points: [Point; 1],
}

#[derive(Debug, Serialize)]
struct MetricDescriptor<'a> {
    #[serde(rename = "type")]
    metric_type: &'a str,
    labels: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct MonitoredResource {
    #[serde(rename = "type")]
    resource_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Point {
    interval: Interval,
    value: TypedValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Interval {
    end_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TypedValue {
    double_value: f64,
}

/// HTTP client for the time-series store
#[derive(Debug, Clone)]
pub struct TimeSeriesClient {
    base_url: String,
    project: String,
    token: Option<String>,
    client: Client,
}

impl TimeSeriesClient {
    /// Create a client writing into `project`
    ///
    /// # Arguments
    /// * `base_url` - The store's base URL (e.g., "https://monitoring.googleapis.com")
    /// * `project` - Project that owns the custom metrics
    /// * `token` - Optional OAuth access token, sent as a bearer token
    pub fn new(base_url: impl Into<String>, project: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.into(),
            token,
            client: Client::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v3/projects/{}/timeSeries", self.base_url, self.project)
    }

    /// Write points, split into requests of at most [`MAX_SERIES_PER_REQUEST`]
    pub async fn write_points(&self, points: &[TimeSeriesPoint]) -> Result<()> {
        let url = self.endpoint();

        for chunk in points.chunks(MAX_SERIES_PER_REQUEST) {
            let mut request = self.client.post(&url).json(&build_request(chunk));
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(ClientError::api_error(status.as_u16(), error_text));
            }
            tracing::debug!("Wrote {} time series to {}", chunk.len(), url);
        }

        Ok(())
    }
}

fn build_request(points: &[TimeSeriesPoint]) -> CreateTimeSeriesRequest<'_> {
    CreateTimeSeriesRequest {
        time_series: points
            .iter()
            .map(|point| TimeSeries {
                metric: MetricDescriptor {
                    metric_type: &point.metric_type,
                    labels: &point.labels,
                },
                resource: MonitoredResource {
                    resource_type: "global",
                },
                points: [Point {
                    interval: Interval {
                        end_time: rfc3339(point.timestamp),
                    },
                    value: TypedValue {
                        double_value: point.value,
                    },
                }],
            })
            .collect(),
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
