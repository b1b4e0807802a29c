//! Build-related API endpoints

use crate::error::Result;
use crate::{BuildkiteClient, Page};
use pulse_core::domain::Build;

impl BuildkiteClient {
    // =============================================================================
    // Builds
    // =============================================================================

    /// List one page of builds across every pipeline of an organization
    ///
    /// # Arguments
    /// * `org` - The organization slug
    /// * `page` - 1-based page number
    /// * `per_page` - Page size, at most 100
    ///
    /// # Returns
    /// The page of builds, most recent first
    pub async fn list_builds_by_org(&self, org: &str, page: u32, per_page: u32) -> Result<Page<Build>> {
        let url = format!("{}/organizations/{}/builds", self.base_url, org);
        self.get_page(&url, page, per_page).await
    }

    /// List one page of builds of a single pipeline
    ///
    /// # Arguments
    /// * `org` - The organization slug
    /// * `pipeline` - The pipeline slug
    /// * `page` - 1-based page number
    /// * `per_page` - Page size, at most 100
    pub async fn list_builds_by_pipeline(
        &self,
        org: &str,
        pipeline: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Build>> {
        let url = format!(
            "{}/organizations/{}/pipelines/{}/builds",
            self.base_url, org, pipeline
        );
        self.get_page(&url, page, per_page).await
    }
}
