//! Cached access to the CI provider
//!
//! Several metrics read the same pipelines every few minutes. The cached
//! client keeps one [`PagedResultCache`] per record kind so those reads cost
//! one provider call per TTL window.

use crate::api::BuildkiteApi;
use crate::cache::{PagedResultCache, RecordCount};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use pulse_core::Clock;
use pulse_core::domain::{Agent, Build, PipelineId};
use std::sync::Arc;
use std::time::Duration;

/// Read access to builds and agents, as needed by the collectors
#[async_trait]
pub trait BuildProvider: Send + Sync {
    /// The `at_least` most recent builds of `pipeline`, newest first
    ///
    /// A pipeline with slug `all` returns builds of every pipeline of the org.
    async fn most_recent_builds(&self, pipeline: &PipelineId, at_least: usize) -> Result<Vec<Build>>;

    /// Every agent connected to `org`
    async fn agents(&self, org: &str) -> Result<Vec<Agent>>;
}

/// [`BuildProvider`] backed by the provider API and a TTL cache
pub struct CachedBuildkiteClient<A> {
    api: A,
    builds: PagedResultCache<Build>,
    agents: PagedResultCache<Agent>,
}

impl<A: BuildkiteApi> CachedBuildkiteClient<A> {
    pub fn new(api: A, ttl: Duration) -> Self {
        Self {
            api,
            builds: PagedResultCache::new(ttl),
            agents: PagedResultCache::new(ttl),
        }
    }

    pub fn with_clock(api: A, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            builds: PagedResultCache::with_clock(ttl, clock.clone()),
            agents: PagedResultCache::with_clock(ttl, clock),
        }
    }
}

#[async_trait]
impl<A: BuildkiteApi> BuildProvider for CachedBuildkiteClient<A> {
    async fn most_recent_builds(&self, pipeline: &PipelineId, at_least: usize) -> Result<Vec<Build>> {
        let api = &self.api;
        let org = pipeline.org.as_str();
        let slug = pipeline.slug.as_str();
        let count = RecordCount::AtLeast(at_least);

        let builds = if pipeline.is_all() {
            self.builds
                .get_records(
                    &pipeline.to_string(),
                    move |page, per_page| api.list_builds_by_org(org, page, per_page),
                    count,
                )
                .await
        } else {
            self.builds
                .get_records(
                    &pipeline.to_string(),
                    move |page, per_page| api.list_builds_by_pipeline(org, slug, page, per_page),
                    count,
                )
                .await
        };

        builds.map_err(|source| ClientError::Fetch {
            what: format!("builds for pipeline {}", pipeline),
            source,
        })
    }

    async fn agents(&self, org: &str) -> Result<Vec<Agent>> {
        let api = &self.api;
        self.agents
            .get_records(
                org,
                move |page, per_page| api.list_agents(org, page, per_page),
                RecordCount::All,
            )
            .await
            .map_err(|source| ClientError::Fetch {
                what: format!("agents for organization {}", org),
                source,
            })
    }
}
