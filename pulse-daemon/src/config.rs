//! Daemon configuration
//!
//! Provider credentials, the pipelines to watch and the optional
//! destinations, all read from environment variables.

use anyhow::Context;
use pulse_core::domain::PipelineId;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.buildkite.com/v2";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CACHE_TIMEOUT_MINUTES: u64 = 5;

/// Time-series store endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesConfig {
    pub url: String,
    pub project: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Provider API token
    pub api_token: String,

    /// Provider base URL
    pub api_url: String,

    /// Organizations whose agents are watched
    pub orgs: Vec<String>,

    /// Pipelines whose builds are analyzed
    pub pipelines: Vec<PipelineId>,

    /// How long provider responses are served from the cache
    pub cache_timeout: Duration,

    /// Postgres URL; stdout is the default destination without it
    pub database_url: Option<String>,

    pub time_series: Option<TimeSeriesConfig>,

    /// Status API bind address
    pub bind_addr: String,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - BUILDKITE_API_TOKEN (required)
    /// - BUILDKITE_ORGS (required, comma separated)
    /// - BUILDKITE_PIPELINES (required, comma separated `org/slug`)
    /// - BUILDKITE_API_URL (optional, default: https://api.buildkite.com/v2)
    /// - BUILDKITE_CACHE_TIMEOUT_MINUTES (optional, default: 5)
    /// - DATABASE_URL (optional)
    /// - TIME_SERIES_URL, TIME_SERIES_PROJECT, TIME_SERIES_TOKEN (optional)
    /// - PULSE_BIND_ADDR (optional, default: 0.0.0.0:8080)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with variables read through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_token = var("BUILDKITE_API_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("BUILDKITE_API_TOKEN environment variable not set"))?;

        let orgs = list(var("BUILDKITE_ORGS"));

        let pipelines = list(var("BUILDKITE_PIPELINES"))
            .iter()
            .map(|id| id.parse::<PipelineId>())
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid BUILDKITE_PIPELINES")?;

        let cache_timeout = match var("BUILDKITE_CACHE_TIMEOUT_MINUTES") {
            Some(minutes) => minutes
                .parse::<u64>()
                .context("BUILDKITE_CACHE_TIMEOUT_MINUTES must be a number of minutes")?,
            None => DEFAULT_CACHE_TIMEOUT_MINUTES,
        };

        let time_series = match (var("TIME_SERIES_URL"), var("TIME_SERIES_PROJECT")) {
            (Some(url), Some(project)) => Some(TimeSeriesConfig {
                url,
                project,
                token: var("TIME_SERIES_TOKEN"),
            }),
            (None, None) => None,
            _ => anyhow::bail!("TIME_SERIES_URL and TIME_SERIES_PROJECT must be set together"),
        };

        Ok(Self {
            api_token,
            api_url: var("BUILDKITE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            orgs,
            pipelines,
            cache_timeout: Duration::from_secs(cache_timeout * 60),
            database_url: var("DATABASE_URL"),
            time_series,
            bind_addr: var("PULSE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_token.is_empty() {
            anyhow::bail!("api_token cannot be empty");
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("api_url must start with http:// or https://");
        }

        if self.orgs.is_empty() {
            anyhow::bail!("at least one organization is required");
        }

        if self.pipelines.is_empty() {
            anyhow::bail!("at least one pipeline is required");
        }

        if self.cache_timeout.is_zero() {
            anyhow::bail!("cache_timeout must be greater than 0");
        }

        if let Some(time_series) = &self.time_series {
            if !time_series.url.starts_with("http://") && !time_series.url.starts_with("https://") {
                anyhow::bail!("time series url must start with http:// or https://");
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_token: "local".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            orgs: vec!["bazel".to_string()],
            pipelines: vec![PipelineId::new("bazel", "bazel-bazel")],
            cache_timeout: Duration::from_secs(DEFAULT_CACHE_TIMEOUT_MINUTES * 60),
            database_url: None,
            time_series: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

fn list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
