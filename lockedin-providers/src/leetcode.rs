//! LeetCode solved-problem signal
//!
//! Uses LeetCode's public GraphQL endpoint; no authentication.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use lockedin_core::{Credential, Provider, SignalInput};

use crate::client::{success_body, GraphQlResponse};
use crate::{ProviderConfig, ProviderError, ProviderFailure, SignalProvider};

const USER_STATS_QUERY: &str = r#"
query userStats($username: String!) {
  matchedUser(username: $username) {
    submitStats {
      acSubmissionNum {
        difficulty
        count
      }
    }
  }
}
"#;

/// LeetCode adapter
pub struct LeetCodeProvider {
    client: Client,
    endpoint: String,
}

impl LeetCodeProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            endpoint: config.leetcode_graphql.clone(),
        }
    }

    async fn solved_count(&self, username: &str) -> Result<f64, ProviderFailure> {
        let body = serde_json::json!({
            "query": USER_STATS_QUERY,
            "variables": { "username": username },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Referer", "https://leetcode.com")
            .json(&body)
            .send()
            .await?;

        let text = success_body(response).await?;
        parse_solved_count(&text, username)
    }
}

#[async_trait]
impl SignalProvider for LeetCodeProvider {
    fn provider(&self) -> Provider {
        Provider::ProblemCount
    }

    async fn fetch(
        &self,
        identifier: &str,
        _credential: Option<&Credential>,
    ) -> Result<SignalInput, ProviderError> {
        let username = identifier.trim();
        if username.is_empty() {
            return Err(ProviderError::new(
                Provider::ProblemCount,
                ProviderFailure::InvalidIdentifier(identifier.to_string()),
            ));
        }

        debug!("Fetching LeetCode stats for {}", username);

        let solved = self
            .solved_count(username)
            .await
            .map_err(|e| ProviderError::new(Provider::ProblemCount, e))?;

        Ok(SignalInput::for_provider(Provider::ProblemCount, solved))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchedUserData {
    matched_user: Option<MatchedUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchedUser {
    submit_stats: Option<SubmitStats>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitStats {
    ac_submission_num: Vec<DifficultyCount>,
}

#[derive(Debug, Deserialize)]
struct DifficultyCount {
    difficulty: String,
    count: u64,
}

/// Parse the stats response; the "All" bucket is the aggregate total
fn parse_solved_count(body: &str, username: &str) -> Result<f64, ProviderFailure> {
    let response: GraphQlResponse<MatchedUserData> = serde_json::from_str(body)?;

    let Some(data) = response.data.as_ref() else {
        let message = response
            .first_error()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "response carried no data".to_string());
        return Err(ProviderFailure::Malformed(message));
    };

    let stats = data
        .matched_user
        .as_ref()
        .and_then(|u| u.submit_stats.as_ref())
        .ok_or_else(|| ProviderFailure::NotFound(username.to_string()))?;

    let total = stats
        .ac_submission_num
        .iter()
        .find(|s| s.difficulty == "All")
        .map(|s| s.count)
        .unwrap_or_else(|| stats.ac_submission_num.iter().map(|s| s.count).sum());

    Ok(total as f64)
}
