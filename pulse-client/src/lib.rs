//! Pulse HTTP Clients
//!
//! Clients for the services the metrics daemon talks to:
//! - The CI provider's REST API (builds and agents, paginated)
//! - A time-series store that accepts numeric samples
//!
//! Provider calls are slow and rate limited, so the daemon reads them through
//! [`CachedBuildkiteClient`], which fronts every list endpoint with a
//! [`PagedResultCache`].
//!
//! # Example
//!
//! ```no_run
//! use pulse_client::{BuildProvider, BuildkiteClient, CachedBuildkiteClient};
//! use pulse_core::domain::PipelineId;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let api = BuildkiteClient::new("https://api.buildkite.com/v2", "token");
//!     let client = CachedBuildkiteClient::new(api, Duration::from_secs(300));
//!
//!     let builds = client
//!         .most_recent_builds(&PipelineId::new("my-org", "my-pipeline"), 20)
//!         .await?;
//!     println!("Fetched {} builds", builds.len());
//!     Ok(())
//! }
//! ```

mod agents;
pub mod api;
mod builds;
pub mod cache;
pub mod cached;
pub mod error;
pub mod time_series;

// Re-export commonly used types
pub use api::BuildkiteApi;
pub use cache::{Page, PagedResultCache, RecordCount};
pub use cached::{BuildProvider, CachedBuildkiteClient};
pub use error::{ClientError, Result};
pub use time_series::TimeSeriesClient;

use reqwest::Client;
use reqwest::header::LINK;
use serde::de::DeserializeOwned;

/// HTTP client for the Buildkite REST API
///
/// Every list endpoint is paginated; responses are returned as a [`Page`]
/// whose `last_page` comes from the `Link` response header.
#[derive(Debug, Clone)]
pub struct BuildkiteClient {
    /// Base URL of the API (e.g., "https://api.buildkite.com/v2")
    base_url: String,
    /// API access token, sent as a bearer token
    token: String,
    /// HTTP client instance
    client: Client,
}

impl BuildkiteClient {
    /// Create a new Buildkite client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the API (e.g., "https://api.buildkite.com/v2")
    /// * `token` - An API access token with read access to builds and agents
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(base_url, token, Client::new())
    }

    /// Create a new Buildkite client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, token: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    /// Get the base URL of the API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Send a GET request for one page of a list endpoint
    async fn get_page<T: DeserializeOwned>(&self, url: &str, page: u32, per_page: u32) -> Result<Page<T>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await?;

        self.handle_page_response(response, page).await
    }

    /// Handle a paginated API response
    ///
    /// Checks the status code, reads the last page number from the `Link`
    /// header and deserializes the body.
    async fn handle_page_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        page: u32,
    ) -> Result<Page<T>> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let err = ClientError::api_error(status.as_u16(), error_text);
            if err.is_rate_limited() {
                tracing::warn!("Buildkite rate limit hit while fetching page {}", page);
            }
            return Err(err);
        }

        let link = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let items = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))?;

        Ok(Page {
            items,
            last_page: last_page_from_link(link.as_deref(), page),
        })
    }
}

/// Extracts the `rel="last"` page number from a `Link` header
///
/// The last page carries no `last` link, so `current` is returned when none
/// is present.
pub fn last_page_from_link(link: Option<&str>, current: u32) -> u32 {
    let Some(link) = link else {
        return current;
    };

    link.split(',')
        .filter(|part| part.contains("rel=\"last\""))
        .find_map(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            let url = reqwest::Url::parse(part.get(start..end)?).ok()?;
            url.query_pairs()
                .find(|(key, _)| key == "page")
                .and_then(|(_, value)| value.parse().ok())
        })
        .unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = BuildkiteClient::new("https://api.buildkite.com/v2", "token");
        assert_eq!(client.base_url(), "https://api.buildkite.com/v2");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = BuildkiteClient::new("https://api.buildkite.com/v2/", "token");
        assert_eq!(client.base_url(), "https://api.buildkite.com/v2");
    }

    #[test]
    fn test_last_page_from_link() {
        let link = "<https://api.buildkite.com/v2/organizations/my-org/builds?page=2&per_page=100>; rel=\"next\", \
                    <https://api.buildkite.com/v2/organizations/my-org/builds?page=7&per_page=100>; rel=\"last\"";
        assert_eq!(last_page_from_link(Some(link), 1), 7);
    }

    #[test]
    fn test_last_page_missing_means_current() {
        let link = "<https://api.buildkite.com/v2/organizations/my-org/builds?page=1&per_page=100>; rel=\"first\", \
                    <https://api.buildkite.com/v2/organizations/my-org/builds?page=2&per_page=100>; rel=\"prev\"";
        assert_eq!(last_page_from_link(Some(link), 3), 3);
        assert_eq!(last_page_from_link(None, 1), 1);
    }

    #[test]
    fn test_last_page_garbage() {
        assert_eq!(last_page_from_link(Some("<not a url>; rel=\"last\""), 2), 2);
    }
}
