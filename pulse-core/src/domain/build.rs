//! Build domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::job::Job;
use super::pipeline::PipelineRef;

/// Environment variable listing the tasks a build was told to skip
pub const SKIP_TASKS_ENV_VAR: &str = "CI_SKIP_TASKS";

/// One execution of a pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Build {
    pub number: i64,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub pipeline: Option<PipelineRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub env: HashMap<String, serde_json::Value>,
    /// Key/value pairs attached to the build by its steps
    #[serde(default)]
    pub meta_data: HashMap<String, serde_json::Value>,
}

impl Build {
    /// Value of `CI_SKIP_TASKS`, or an empty string
    pub fn skipped_tasks(&self) -> String {
        self.env
            .get(SKIP_TASKS_ENV_VAR)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Slug of the pipeline this build belongs to, if the provider reported it
    pub fn pipeline_slug(&self) -> Option<&str> {
        self.pipeline.as_ref().and_then(|p| p.slug.as_deref())
    }
}
