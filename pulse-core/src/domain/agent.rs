//! Agent domain model
//!
//! Represents a CI worker registered with the provider.

use serde::{Deserialize, Serialize};

/// A worker that can execute jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub hostname: Option<String>,

    /// e.g. "connected", "disconnected", "lost"
    #[serde(default)]
    pub connection_state: Option<String>,

    /// Job currently assigned to the agent, if any
    #[serde(default)]
    pub job: Option<serde_json::Value>,
}

impl Agent {
    /// An agent is busy while the provider reports a job for it
    pub fn is_busy(&self) -> bool {
        matches!(self.job, Some(ref job) if !job.is_null())
    }
}
