//! Codeforces peak-rating signal
//!
//! Uses the public `user.info` endpoint; no authentication.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use lockedin_core::{Credential, Provider, SignalInput};

use crate::client::success_body;
use crate::{ProviderConfig, ProviderError, ProviderFailure, SignalProvider};

/// Codeforces adapter
pub struct CodeforcesProvider {
    client: Client,
    api_base: String,
}

impl CodeforcesProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            api_base: config.codeforces_api.trim_end_matches('/').to_string(),
        }
    }

    async fn peak_rating(&self, handle: &str) -> Result<f64, ProviderFailure> {
        let url = format!(
            "{}/user.info?handles={}",
            self.api_base,
            urlencoding::encode(handle)
        );

        let response = self.client.get(&url).send().await?;

        // Codeforces answers unknown handles with 400 and a FAILED status
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(ProviderFailure::NotFound(handle.to_string()));
        }

        let text = success_body(response).await?;
        parse_peak_rating(&text, handle)
    }
}

#[async_trait]
impl SignalProvider for CodeforcesProvider {
    fn provider(&self) -> Provider {
        Provider::CompetitiveRating
    }

    async fn fetch(
        &self,
        identifier: &str,
        _credential: Option<&Credential>,
    ) -> Result<SignalInput, ProviderError> {
        let handle = identifier.trim();
        if handle.is_empty() {
            return Err(ProviderError::new(
                Provider::CompetitiveRating,
                ProviderFailure::InvalidIdentifier(identifier.to_string()),
            ));
        }

        debug!("Fetching Codeforces rating for {}", handle);

        let rating = self
            .peak_rating(handle)
            .await
            .map_err(|e| ProviderError::new(Provider::CompetitiveRating, e))?;

        Ok(SignalInput::for_provider(Provider::CompetitiveRating, rating))
    }
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    status: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    result: Vec<UserInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    rating: Option<i64>,
    max_rating: Option<i64>,
}

/// Parse `user.info`; unrated accounts report a rating of 0
fn parse_peak_rating(body: &str, handle: &str) -> Result<f64, ProviderFailure> {
    let response: UserInfoResponse = serde_json::from_str(body)?;

    if response.status != "OK" {
        return Err(ProviderFailure::Malformed(
            response
                .comment
                .unwrap_or_else(|| format!("status {} for '{}'", response.status, handle)),
        ));
    }

    let user = response.result.first().ok_or_else(|| {
        ProviderFailure::Malformed(format!("empty result for '{}'", handle))
    })?;

    Ok(user.max_rating.or(user.rating).unwrap_or(0) as f64)
}
