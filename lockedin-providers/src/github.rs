//! GitHub contribution signal
//!
//! Two strategies, chosen per call and never mixed:
//! - **Precise**: with the user's OAuth token, the GraphQL API returns the
//!   exact contribution total for the last year.
//! - **Heuristic**: without a token, the public profile's repository count
//!   is used as a coarse proxy (`public_repos × 50`).

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;

use lockedin_core::{Credential, Provider, SignalInput};

use crate::client::{success_body, GraphQlResponse};
use crate::{ProviderConfig, ProviderError, ProviderFailure, SignalProvider};

/// Estimated contributions per public repository for the heuristic strategy
pub const CONTRIBUTIONS_PER_PUBLIC_REPO: f64 = 50.0;

const CONTRIBUTIONS_QUERY: &str = r#"
query($login: String!) {
  user(login: $login) {
    contributionsCollection {
      contributionCalendar {
        totalContributions
      }
    }
  }
}
"#;

static PROFILE_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"github\.com/([^/?#\s]+)").unwrap());

/// Extract a login from a profile URL or a bare username
pub fn github_username_from_proof(input: &str) -> Option<String> {
    let input = input.trim();
    if input.contains("github.com/") {
        return PROFILE_URL_REGEX
            .captures(input)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
    }
    if input.is_empty() {
        None
    } else {
        Some(input.trim_start_matches('@').to_string())
    }
}

/// How a contribution count is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionStrategy {
    Precise,
    Heuristic,
}

impl ContributionStrategy {
    pub fn select(credential: Option<&Credential>) -> Self {
        if credential.is_some() {
            ContributionStrategy::Precise
        } else {
            ContributionStrategy::Heuristic
        }
    }
}

/// GitHub adapter
pub struct GitHubProvider {
    client: Client,
    api_base: String,
}

impl GitHubProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            api_base: config.github_api.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_precise(&self, login: &str, token: &Credential) -> Result<f64, ProviderFailure> {
        let body = serde_json::json!({
            "query": CONTRIBUTIONS_QUERY,
            "variables": { "login": login },
        });

        let response = self
            .client
            .post(format!("{}/graphql", self.api_base))
            .bearer_auth(token.expose())
            .json(&body)
            .send()
            .await?;

        let text = success_body(response).await?;
        parse_contribution_total(&text, login)
    }

    async fn fetch_heuristic(&self, login: &str) -> Result<f64, ProviderFailure> {
        let url = format!("{}/users/{}", self.api_base, urlencoding::encode(login));

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderFailure::NotFound(login.to_string()));
        }

        let text = success_body(response).await?;
        parse_profile_estimate(&text)
    }
}

#[async_trait]
impl SignalProvider for GitHubProvider {
    fn provider(&self) -> Provider {
        Provider::SourceControl
    }

    async fn fetch(
        &self,
        identifier: &str,
        credential: Option<&Credential>,
    ) -> Result<SignalInput, ProviderError> {
        let fail = |cause| ProviderError::new(Provider::SourceControl, cause);

        let login = github_username_from_proof(identifier)
            .ok_or_else(|| fail(ProviderFailure::InvalidIdentifier(identifier.to_string())))?;

        let strategy = ContributionStrategy::select(credential);
        debug!("Fetching GitHub contributions for {} ({:?})", login, strategy);

        let total = match (strategy, credential) {
            (ContributionStrategy::Precise, Some(token)) => self.fetch_precise(&login, token).await,
            _ => self.fetch_heuristic(&login).await,
        }
        .map_err(fail)?;

        Ok(SignalInput::for_provider(Provider::SourceControl, total))
    }
}

#[derive(Debug, Deserialize)]
struct ContributionsData {
    user: Option<ContributionsUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionsUser {
    contributions_collection: ContributionsCollection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionsCollection {
    contribution_calendar: ContributionCalendar,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionCalendar {
    total_contributions: u64,
}

#[derive(Debug, Deserialize)]
struct PublicProfile {
    public_repos: u64,
}

/// Parse the GraphQL contribution-calendar response. Any error in the
/// envelope fails the fetch, even alongside partial data.
fn parse_contribution_total(body: &str, login: &str) -> Result<f64, ProviderFailure> {
    let response: GraphQlResponse<ContributionsData> = serde_json::from_str(body)?;

    if let Some(err) = response.first_error() {
        return Err(match err.kind.as_deref() {
            Some("NOT_FOUND") => ProviderFailure::NotFound(login.to_string()),
            _ => ProviderFailure::Malformed(err.message.clone()),
        });
    }

    match response.data.and_then(|d| d.user) {
        Some(user) => Ok(user
            .contributions_collection
            .contribution_calendar
            .total_contributions as f64),
        None => Err(ProviderFailure::NotFound(login.to_string())),
    }
}

/// Parse the public profile and estimate contributions from it
fn parse_profile_estimate(body: &str) -> Result<f64, ProviderFailure> {
    let profile: PublicProfile = serde_json::from_str(body)?;
    Ok(profile.public_repos as f64 * CONTRIBUTIONS_PER_PUBLIC_REPO)
}
