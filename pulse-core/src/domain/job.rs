//! Job domain types
//!
//! A job is one schedulable unit of work within a build. Timestamps follow
//! the provider's lifecycle: scheduled -> created -> runnable -> started -> finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job record as reported by the CI provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// `None` for wait steps
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub agent_query_rules: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runnable_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agent: Option<JobAgent>,
}

/// Agent summary attached to a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobAgent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

impl Job {
    /// Whether the job ran on a worker and has completed
    ///
    /// Wait steps have no name, jobs cancelled while waiting for an agent have
    /// no runnable timestamp and running jobs have no finish timestamp.
    pub fn is_finished_worker_task(&self) -> bool {
        self.name.is_some() && self.runnable_at.is_some() && self.finished_at.is_some()
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.state.as_deref() == Some(state)
    }
}
