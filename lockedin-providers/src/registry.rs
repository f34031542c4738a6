//! Provider registry
//!
//! Holds one adapter per provider and fans requests out concurrently.
//! Failures never escape: each one is logged and reported, and the signal
//! is simply absent from the result.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use lockedin_core::{Credential, Provider, SignalInput};

use crate::{
    create_http_client, CodeforcesProvider, GitHubProvider, LeetCodeProvider, ProviderConfig,
    ProviderError, ProviderFailure, SharedProvider,
};

/// One provider lookup
#[derive(Debug, Clone)]
pub struct SignalRequest {
    pub provider: Provider,
    pub identifier: String,
    pub credential: Option<Credential>,
}

impl SignalRequest {
    pub fn new(provider: Provider, identifier: impl Into<String>) -> Self {
        Self {
            provider,
            identifier: identifier.into(),
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }
}

/// Outcome of a fan-out: what was fetched and what could not be
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Successful signals, ordered by key
    pub signals: Vec<SignalInput>,
    pub failures: Vec<ProviderError>,
}

impl FetchReport {
    pub fn failed_providers(&self) -> Vec<Provider> {
        self.failures.iter().map(|f| f.provider).collect()
    }
}

/// Registry of signal adapters
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, SharedProvider>,
    timeout: Duration,
    max_concurrent: usize,
}

impl ProviderRegistry {
    /// Empty registry; adapters are added with [`with_provider`](Self::with_provider)
    pub fn new(timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            providers: HashMap::new(),
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Registry with the live HTTP adapters, sharing one client
    pub fn http(config: &ProviderConfig) -> Result<Self, ProviderFailure> {
        let client = create_http_client(config)?;

        Ok(Self::new(config.timeout(), config.max_concurrent)
            .with_provider(Arc::new(GitHubProvider::new(client.clone(), config)))
            .with_provider(Arc::new(CodeforcesProvider::new(client.clone(), config)))
            .with_provider(Arc::new(LeetCodeProvider::new(client, config))))
    }

    /// Register an adapter, replacing any existing one for the same provider
    pub fn with_provider(mut self, provider: SharedProvider) -> Self {
        self.providers.insert(provider.provider(), provider);
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&SharedProvider> {
        self.providers.get(&provider)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch one signal under the registry's hard timeout
    pub async fn fetch(
        &self,
        provider: Provider,
        identifier: &str,
        credential: Option<&Credential>,
    ) -> Result<SignalInput, ProviderError> {
        let adapter = self
            .get(provider)
            .ok_or_else(|| ProviderError::new(provider, ProviderFailure::NotConfigured))?;

        match tokio::time::timeout(self.timeout, adapter.fetch(identifier, credential)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(provider, ProviderFailure::Timeout)),
        }
    }

    /// Fetch every request concurrently, reducing failures to absent signals
    pub async fn fetch_all(&self, requests: Vec<SignalRequest>) -> FetchReport {
        let results: Vec<Result<SignalInput, ProviderError>> = stream::iter(requests)
            .map(|request| async move {
                self.fetch(
                    request.provider,
                    &request.identifier,
                    request.credential.as_ref(),
                )
                .await
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = FetchReport::default();
        for result in results {
            match result {
                Ok(signal) => {
                    debug!("Signal {} = {}", signal.key, signal.raw_value);
                    report.signals.push(signal);
                }
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        report.signals.sort_by(|a, b| a.key.cmp(&b.key));
        report
    }
}
