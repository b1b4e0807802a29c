//! Paged list operations of the CI provider
//!
//! [`CachedBuildkiteClient`](crate::CachedBuildkiteClient) is generic over
//! this trait so tests can substitute an in-memory provider.

use crate::error::Result;
use crate::{BuildkiteClient, Page};
use async_trait::async_trait;
use pulse_core::domain::{Agent, Build};

#[async_trait]
pub trait BuildkiteApi: Send + Sync {
    /// Builds across all pipelines of `org`, most recent first
    async fn list_builds_by_org(&self, org: &str, page: u32, per_page: u32) -> Result<Page<Build>>;

    /// Builds of one pipeline, most recent first
    async fn list_builds_by_pipeline(
        &self,
        org: &str,
        pipeline: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Build>>;

    async fn list_agents(&self, org: &str, page: u32, per_page: u32) -> Result<Page<Agent>>;
}

#[async_trait]
impl BuildkiteApi for BuildkiteClient {
    async fn list_builds_by_org(&self, org: &str, page: u32, per_page: u32) -> Result<Page<Build>> {
        BuildkiteClient::list_builds_by_org(self, org, page, per_page).await
    }

    async fn list_builds_by_pipeline(
        &self,
        org: &str,
        pipeline: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Build>> {
        BuildkiteClient::list_builds_by_pipeline(self, org, pipeline, page, per_page).await
    }

    async fn list_agents(&self, org: &str, page: u32, per_page: u32) -> Result<Page<Agent>> {
        BuildkiteClient::list_agents(self, org, page, per_page).await
    }
}
