//! HTTP client shared by the provider adapters
//!
//! One `reqwest::Client` is built per registry so connection pools are
//! shared across adapters. Every request carries the configured timeout.

use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ProviderFailure;

/// Provider endpoints and request limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum provider calls in flight for one fan-out
    pub max_concurrent: usize,
    /// User agent sent with every request (GitHub rejects requests without one)
    pub user_agent: String,
    /// GitHub REST/GraphQL API base
    pub github_api: String,
    /// Codeforces API base
    pub codeforces_api: String,
    /// LeetCode GraphQL endpoint
    pub leetcode_graphql: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_concurrent: 3,
            user_agent: concat!("lockedin-gate/", env!("CARGO_PKG_VERSION")).to_string(),
            github_api: "https://api.github.com".to_string(),
            codeforces_api: "https://codeforces.com/api".to_string(),
            leetcode_graphql: "https://leetcode.com/graphql".to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Build the HTTP client used by every adapter
pub fn create_http_client(config: &ProviderConfig) -> Result<Client, ProviderFailure> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ProviderFailure::ClientBuild(e.to_string()))
}

/// Read the body of a 2xx response, mapping anything else to a status failure
pub(crate) async fn success_body(response: Response) -> Result<String, ProviderFailure> {
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderFailure::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// GraphQL response envelope
#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl<T> GraphQlResponse<T> {
    pub fn first_error(&self) -> Option<&GraphQlError> {
        self.errors.first()
    }
}
