//! Common interface for signal providers

use async_trait::async_trait;
use lockedin_core::{Credential, Provider, SignalInput};
use std::sync::Arc;
use thiserror::Error;

/// Why a provider could not determine a value
#[derive(Debug, Error)]
pub enum ProviderFailure {
    #[error("request failed: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("'{0}' not found")]
    NotFound(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("no adapter configured")]
    NotConfigured,

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl From<reqwest::Error> for ProviderFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderFailure::Timeout
        } else if err.is_decode() {
            ProviderFailure::Malformed(err.to_string())
        } else {
            ProviderFailure::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderFailure {
    fn from(err: serde_json::Error) -> Self {
        ProviderFailure::Malformed(err.to_string())
    }
}

/// A provider failed to produce a signal
#[derive(Debug, Error)]
#[error("{provider} provider failed: {cause}")]
pub struct ProviderError {
    pub provider: Provider,
    #[source]
    pub cause: ProviderFailure,
}

impl ProviderError {
    pub fn new(provider: Provider, cause: ProviderFailure) -> Self {
        Self { provider, cause }
    }
}

/// Adapter for one external signal source
///
/// `fetch` fails only when the value cannot be determined. A legitimately
/// zero value (an unrated account, nothing solved yet) is `Ok`.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Which source this adapter talks to
    fn provider(&self) -> Provider;

    /// Fetch the signal for a profile identifier
    async fn fetch(
        &self,
        identifier: &str,
        credential: Option<&Credential>,
    ) -> Result<SignalInput, ProviderError>;
}

/// Thread-safe reference to a provider adapter
pub type SharedProvider = Arc<dyn SignalProvider>;
