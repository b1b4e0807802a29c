//! Agent-related API endpoints

use crate::error::Result;
use crate::{BuildkiteClient, Page};
use pulse_core::domain::Agent;

impl BuildkiteClient {
    /// List one page of the agents connected to an organization
    pub async fn list_agents(&self, org: &str, page: u32, per_page: u32) -> Result<Page<Agent>> {
        let url = format!("{}/organizations/{}/agents", self.base_url, org);
        self.get_page(&url, page, per_page).await
    }
}
