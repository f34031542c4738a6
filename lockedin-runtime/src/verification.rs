//! Verification pipeline
//!
//! Scores one application end to end:
//! 1. load the application (missing → not found, dropped by the queue)
//! 2. load weights and fetch every proven provider, concurrently
//! 3. score and derive the decision
//! 4. commit the score and, for automatic decisions, the user status, in
//!    one transaction
//!
//! Provider failures only remove that signal from the score.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use lockedin_core::{
    ApplicationStatus, Decision, Provider, ScoringResult, ScoringThresholds, SignalInput,
    UserStatus,
};
use lockedin_providers::{ProviderRegistry, SignalRequest};

use crate::error::PipelineError;
use crate::queue::{Job, JobHandler};
use crate::refresh::SignalCache;
use crate::store::{DecisionWrite, SharedStore};
use crate::weights_cache::WeightCache;

/// Verification queue payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationJob {
    pub application_id: String,
}

impl VerificationJob {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
        }
    }

    /// At most one live job per application
    pub fn idempotency_key(&self) -> String {
        format!("verify-{}", self.application_id)
    }
}

/// Result of scoring one application
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub application_id: String,
    pub result: ScoringResult,
    pub decision: Decision,
    /// Providers whose live fetch failed
    pub failed_providers: Vec<Provider>,
    /// Failed providers whose last refreshed value was used instead
    pub fallback_providers: Vec<Provider>,
}

/// Fetch → score → persist for one application
pub struct VerificationPipeline {
    store: SharedStore,
    weights: Arc<WeightCache>,
    registry: Arc<ProviderRegistry>,
    thresholds: ScoringThresholds,
    fallback: Option<Arc<SignalCache>>,
}

impl VerificationPipeline {
    pub fn new(
        store: SharedStore,
        weights: Arc<WeightCache>,
        registry: Arc<ProviderRegistry>,
        thresholds: ScoringThresholds,
    ) -> Self {
        Self {
            store,
            weights,
            registry,
            thresholds,
            fallback: None,
        }
    }

    /// Use refreshed signals for providers whose live fetch fails
    pub fn with_cached_fallback(mut self, signals: Arc<SignalCache>) -> Self {
        self.fallback = Some(signals);
        self
    }

    pub fn thresholds(&self) -> &ScoringThresholds {
        &self.thresholds
    }

    pub async fn verify(&self, application_id: &str) -> Result<VerificationOutcome, PipelineError> {
        let application = self
            .store
            .find_application(application_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("application", application_id))?;

        debug!("Scoring application {}...", application_id);

        let providers = application.proven_providers();
        let user = if providers.contains(&Provider::SourceControl) {
            self.store.find_user(&application.user_id).await?
        } else {
            None
        };

        let requests: Vec<SignalRequest> = providers
            .iter()
            .filter_map(|provider| {
                let proof = application.proof_for(*provider)?;
                let credential = user
                    .as_ref()
                    .and_then(|u| u.credential_for(*provider))
                    .cloned();
                Some(SignalRequest::new(*provider, proof).with_credential(credential))
            })
            .collect();

        let (weights, report) = tokio::join!(
            self.weights.get_weights(),
            self.registry.fetch_all(requests)
        );
        let weights = weights?;

        let failed_providers = report.failed_providers();
        let mut signals = report.signals;
        let fallback_providers = self
            .fill_from_cache(&application.user_id, &failed_providers, &mut signals)
            .await;

        let (result, decision) = self.thresholds.evaluate(&signals, &weights);

        self.store
            .apply_decision(DecisionWrite {
                application_id: application.id.clone(),
                user_id: application.user_id.clone(),
                score: result.score,
                breakdown: result.breakdown.clone(),
                passing_threshold: result.passing_threshold,
                status: ApplicationStatus::from(decision),
                user_status: UserStatus::from_decision(decision),
            })
            .await?;

        info!(
            "Application {} scored {} → {}",
            application_id, result.score, decision
        );

        Ok(VerificationOutcome {
            application_id: application.id,
            result,
            decision,
            failed_providers,
            fallback_providers,
        })
    }

    async fn fill_from_cache(
        &self,
        user_id: &str,
        failed: &[Provider],
        signals: &mut Vec<SignalInput>,
    ) -> Vec<Provider> {
        let Some(cache) = &self.fallback else {
            return Vec::new();
        };

        let mut used = Vec::new();
        for provider in failed {
            match cache.get(user_id, *provider).await {
                Ok(Some(cached)) => {
                    debug!(
                        "Using cached {} value {} for {}",
                        provider, cached.raw_value, user_id
                    );
                    signals.push(cached.to_input());
                    used.push(*provider);
                }
                Ok(None) => {}
                Err(e) => warn!("Cached {} signal unavailable: {}", provider, e),
            }
        }

        signals.sort_by(|a, b| a.key.cmp(&b.key));
        used
    }
}

#[async_trait]
impl JobHandler<VerificationJob> for VerificationPipeline {
    async fn handle(&self, job: &Job<VerificationJob>) -> Result<(), PipelineError> {
        self.verify(&job.payload.application_id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, SharedCache};
    use crate::refresh::CachedSignal;
    use crate::store::{AdmissionStore, MemoryStore, StoreError};
    use crate::weights_cache::TtlConfig;
    use chrono::Utc;
    use lockedin_core::{default_weight_rows, Application, Credential, User, WeightRow};
    use lockedin_providers::{ProviderError, ProviderFailure, SignalProvider};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct StubProvider {
        provider: Provider,
        value: Option<f64>,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl StubProvider {
        fn new(provider: Provider, value: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                provider,
                value,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SignalProvider for StubProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn fetch(
            &self,
            identifier: &str,
            credential: Option<&Credential>,
        ) -> Result<SignalInput, ProviderError> {
            self.seen
                .lock()
                .push((identifier.to_string(), credential.is_some()));
            match self.value {
                Some(v) => Ok(SignalInput::for_provider(self.provider, v)),
                None => Err(ProviderError::new(self.provider, ProviderFailure::Timeout)),
            }
        }
    }

    /// Store whose decision writes always fail
    struct BrokenWrites(MemoryStore);

    #[async_trait]
    impl AdmissionStore for BrokenWrites {
        async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
            self.0.find_application(id).await
        }
        async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
            self.0.find_user(id).await
        }
        async fn application_ids_with_status(
            &self,
            status: ApplicationStatus,
        ) -> Result<Vec<String>, StoreError> {
            self.0.application_ids_with_status(status).await
        }
        async fn load_weight_rows(&self) -> Result<Vec<WeightRow>, StoreError> {
            self.0.load_weight_rows().await
        }
        async fn update_weight_row(&self, row: WeightRow) -> Result<(), StoreError> {
            self.0.update_weight_row(row).await
        }
        async fn apply_decision(&self, _write: DecisionWrite) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }
    }

    fn pipeline_with(
        store: SharedStore,
        providers: Vec<Arc<StubProvider>>,
    ) -> (VerificationPipeline, SharedCache) {
        let cache: SharedCache = Arc::new(MemoryCache::default());
        let weights = Arc::new(WeightCache::new(
            store.clone(),
            cache.clone(),
            TtlConfig::weights().ttl(),
        ));
        let mut registry = ProviderRegistry::new(Duration::from_secs(5), 3);
        for provider in providers {
            registry = registry.with_provider(provider);
        }
        let pipeline = VerificationPipeline::new(
            store,
            weights,
            Arc::new(registry),
            ScoringThresholds::default(),
        );
        (pipeline, cache)
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::with_weights(default_weight_rows()));
        store.insert_user(User::new("user-1").with_github_token(Credential::new("gho_x")));
        store
    }

    #[test]
    fn test_payload_and_key() {
        let job = VerificationJob::new("app-9");
        assert_eq!(job.idempotency_key(), "verify-app-9");
        assert_eq!(
            serde_json::to_string(&job).unwrap(),
            r#"{"applicationId":"app-9"}"#
        );
    }

    #[tokio::test]
    async fn test_verify_passes_proofs_and_credential() {
        let store = seeded_store();
        store.insert_application(
            Application::new("app-1", "user-1")
                .with_github("https://github.com/octocat")
                .with_codeforces("tourist"),
        );

        let github = StubProvider::new(Provider::SourceControl, Some(1000.0));
        let codeforces = StubProvider::new(Provider::CompetitiveRating, Some(2100.0));
        let (pipeline, _) =
            pipeline_with(store.clone(), vec![github.clone(), codeforces.clone()]);

        let outcome = pipeline.verify("app-1").await.unwrap();
        assert_eq!(outcome.result.score, 100.0);
        assert_eq!(outcome.decision, Decision::Approved);

        assert_eq!(
            github.seen.lock().clone(),
            vec![("https://github.com/octocat".to_string(), true)]
        );
        assert_eq!(
            codeforces.seen.lock().clone(),
            vec![("tourist".to_string(), false)]
        );

        let app = store.application("app-1").unwrap();
        assert_eq!(app.status, ApplicationStatus::Approved);
        assert_eq!(store.user("user-1").unwrap().status, UserStatus::Approved);
    }

    #[tokio::test]
    async fn test_unproven_providers_are_not_called() {
        let store = seeded_store();
        store.insert_application(Application::new("app-1", "user-1").with_leetcode("alice"));

        let github = StubProvider::new(Provider::SourceControl, Some(1000.0));
        let leetcode = StubProvider::new(Provider::ProblemCount, Some(50.0));
        let (pipeline, _) = pipeline_with(store.clone(), vec![github.clone(), leetcode]);

        let outcome = pipeline.verify("app-1").await.unwrap();
        assert!(github.seen.lock().is_empty());
        assert_eq!(outcome.result.score, 0.0);
        assert_eq!(outcome.decision, Decision::Rejected);
        assert_eq!(store.user("user-1").unwrap().status, UserStatus::Rejected);
    }

    #[tokio::test]
    async fn test_failed_provider_is_skipped() {
        let store = seeded_store();
        store.insert_application(
            Application::new("app-1", "user-1")
                .with_github("octocat")
                .with_codeforces("tourist"),
        );

        let (pipeline, _) = pipeline_with(
            store.clone(),
            vec![
                StubProvider::new(Provider::SourceControl, Some(1000.0)),
                StubProvider::new(Provider::CompetitiveRating, None),
            ],
        );

        let outcome = pipeline.verify("app-1").await.unwrap();
        assert_eq!(outcome.failed_providers, vec![Provider::CompetitiveRating]);
        assert_eq!(outcome.result.score, 100.0);
        assert!(!outcome.result.breakdown.contains_key("codeforces_rating"));
    }

    #[tokio::test]
    async fn test_cached_fallback_fills_failed_provider() {
        let store = seeded_store();
        store.insert_application(
            Application::new("app-1", "user-1")
                .with_github("octocat")
                .with_codeforces("tourist"),
        );

        let (pipeline, cache) = pipeline_with(
            store.clone(),
            vec![
                StubProvider::new(Provider::SourceControl, Some(1000.0)),
                StubProvider::new(Provider::CompetitiveRating, None),
            ],
        );
        let signals = Arc::new(SignalCache::new(cache, TtlConfig::signals().ttl()));
        signals
            .put(
                "user-1",
                Provider::CompetitiveRating,
                &CachedSignal {
                    key: "codeforces_rating".to_string(),
                    raw_value: 1200.0,
                    fetched_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let pipeline = pipeline.with_cached_fallback(signals);

        let outcome = pipeline.verify("app-1").await.unwrap();
        assert_eq!(outcome.fallback_providers, vec![Provider::CompetitiveRating]);
        // 100 × 0.35 + 0 × 0.25 over 0.60
        assert_eq!(outcome.result.score, 58.33);
        assert_eq!(outcome.decision, Decision::UnderReview);
        assert_eq!(store.user("user-1").unwrap().status, UserStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_application_is_fatal() {
        let (pipeline, _) = pipeline_with(seeded_store(), Vec::new());
        let err = pipeline.verify("nope").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { entity: "application", .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_write_failure_is_retryable() {
        let inner = MemoryStore::with_weights(default_weight_rows());
        inner.insert_application(Application::new("app-1", "user-1").with_codeforces("x"));
        let store: SharedStore = Arc::new(BrokenWrites(inner));

        let (pipeline, _) = pipeline_with(
            store,
            vec![StubProvider::new(Provider::CompetitiveRating, Some(1500.0))],
        );

        let err = pipeline.verify("app-1").await.unwrap_err();
        assert!(matches!(err, PipelineError::Transaction(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unloadable_weights_are_config_errors() {
        let store = Arc::new(MemoryStore::new());
        store.put_weight_row(WeightRow {
            key: String::new(),
            weight: 0.5,
            threshold: 1.0,
            minimum: 0.0,
            description: String::new(),
        });
        store.insert_application(Application::new("app-1", "user-1").with_codeforces("x"));

        let (pipeline, _) = pipeline_with(
            store,
            vec![StubProvider::new(Provider::CompetitiveRating, Some(1500.0))],
        );
        assert!(matches!(
            pipeline.verify("app-1").await,
            Err(PipelineError::Config(_))
        ));
    }
}
