//! End-to-end admission scenarios through the gate's queues

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lockedin_core::{
    default_weight_rows, Application, ApplicationStatus, Credential, Provider, SignalInput, User,
    UserStatus, WeightPatch, WeightRow, CODEFORCES_RATING, GITHUB_CONTRIBUTIONS,
};
use lockedin_providers::{ProviderError, ProviderFailure, ProviderRegistry, SignalProvider};
use lockedin_runtime::{
    AdmissionStore, DecisionWrite, Enqueued, Gate, GateConfig, GateDeps, ManualClock,
    MemoryCache, MemoryStore, RefreshOutcome, StoreError,
};

/// Answers from a fixed table of identifier → value
struct ScriptedProvider {
    provider: Provider,
    values: HashMap<String, f64>,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new(provider: Provider, values: &[(&str, f64)]) -> Arc<Self> {
        Self::slow(provider, values, Duration::ZERO)
    }

    fn slow(provider: Provider, values: &[(&str, f64)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            provider,
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalProvider for ScriptedProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(
        &self,
        identifier: &str,
        _credential: Option<&Credential>,
    ) -> Result<SignalInput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.values
            .get(identifier)
            .map(|v| SignalInput::for_provider(self.provider, *v))
            .ok_or_else(|| {
                ProviderError::new(self.provider, ProviderFailure::NotFound(identifier.to_string()))
            })
    }
}

/// Store whose decision commits fail while `failing` is set
struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
    commits: AtomicU32,
}

#[async_trait]
impl AdmissionStore for FlakyStore {
    async fn find_application(&self, id: &str) -> Result<Option<Application>, StoreError> {
        self.inner.find_application(id).await
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user(id).await
    }

    async fn application_ids_with_status(
        &self,
        status: ApplicationStatus,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.application_ids_with_status(status).await
    }

    async fn load_weight_rows(&self) -> Result<Vec<WeightRow>, StoreError> {
        self.inner.load_weight_rows().await
    }

    async fn update_weight_row(&self, row: WeightRow) -> Result<(), StoreError> {
        self.inner.update_weight_row(row).await
    }

    async fn apply_decision(&self, write: DecisionWrite) -> Result<(), StoreError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.apply_decision(write).await
    }
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::with_weights(default_weight_rows()));
    for user in ["strong", "weak", "mixed"] {
        store.insert_user(User::new(user).with_handle(Provider::SourceControl, user));
    }

    store.insert_application(
        Application::new("app-strong", "strong")
            .with_github("https://github.com/strong")
            .with_status(ApplicationStatus::Processing),
    );
    store.insert_application(
        Application::new("app-weak", "weak")
            .with_codeforces("newbie")
            .with_status(ApplicationStatus::Processing),
    );
    store.insert_application(
        Application::new("app-mixed", "mixed")
            .with_github("https://github.com/mixed")
            .with_codeforces("specialist")
            .with_status(ApplicationStatus::Processing),
    );
    store
}

fn registry(github: Arc<ScriptedProvider>) -> Arc<ProviderRegistry> {
    let codeforces = ScriptedProvider::new(
        Provider::CompetitiveRating,
        &[("newbie", 1200.0), ("specialist", 1200.0), ("legend", 3000.0)],
    );
    Arc::new(
        ProviderRegistry::new(Duration::from_secs(5), 3)
            .with_provider(github)
            .with_provider(codeforces),
    )
}

fn default_github() -> Arc<ScriptedProvider> {
    ScriptedProvider::new(
        Provider::SourceControl,
        &[
            ("https://github.com/strong", 1000.0),
            ("https://github.com/mixed", 1000.0),
            // bare handles, as refresh looks them up from the user record
            ("strong", 1000.0),
            ("mixed", 640.0),
        ],
    )
}

fn build_gate(store: Arc<dyn AdmissionStore>, github: Arc<ScriptedProvider>) -> Gate {
    let clock = Arc::new(ManualClock::starting_now());
    let deps = GateDeps {
        store,
        cache: Arc::new(MemoryCache::new(clock.clone())),
        clock,
        registry: registry(github),
    };
    Gate::new(GateConfig::default(), deps).unwrap()
}

#[tokio::test(start_paused = true)]
async fn strong_contributor_is_approved() {
    let store = seeded_store();
    let gate = build_gate(store.clone(), default_github());
    gate.start();

    gate.enqueue_verification("app-strong").unwrap();
    gate.wait_idle().await;

    let application = store.application("app-strong").unwrap();
    assert_eq!(application.score, Some(100.0));
    assert_eq!(application.status, ApplicationStatus::Approved);
    assert_eq!(application.passing_threshold, Some(70.0));
    let breakdown = application.score_breakdown.unwrap();
    assert_eq!(breakdown[GITHUB_CONTRIBUTIONS].normalized_value, 100.0);
    assert_eq!(store.user("strong").unwrap().status, UserStatus::Approved);

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rating_at_minimum_is_rejected() {
    let store = seeded_store();
    let gate = build_gate(store.clone(), default_github());
    gate.start();

    gate.enqueue_verification("app-weak").unwrap();
    gate.wait_idle().await;

    let application = store.application("app-weak").unwrap();
    assert_eq!(application.score, Some(0.0));
    assert_eq!(application.status, ApplicationStatus::Rejected);
    assert_eq!(store.user("weak").unwrap().status, UserStatus::Rejected);

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn middling_score_goes_to_review() {
    let store = seeded_store();
    let gate = build_gate(store.clone(), default_github());
    gate.start();

    gate.enqueue_verification("app-mixed").unwrap();
    gate.wait_idle().await;

    let application = store.application("app-mixed").unwrap();
    assert_eq!(application.score, Some(58.33));
    assert_eq!(application.status, ApplicationStatus::UnderReview);
    assert_eq!(
        application.score_breakdown.unwrap()[CODEFORCES_RATING].normalized_value,
        0.0
    );
    // review outcomes are left to a human
    assert_eq!(store.user("mixed").unwrap().status, UserStatus::Pending);

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn one_execution_per_idempotency_key() {
    let store = seeded_store();
    let github = ScriptedProvider::slow(
        Provider::SourceControl,
        &[("https://github.com/strong", 1000.0)],
        Duration::from_secs(1),
    );
    let gate = build_gate(store, github.clone());

    assert!(gate.enqueue_verification("app-strong").unwrap().is_added());
    assert!(!gate.enqueue_verification("app-strong").unwrap().is_added());
    gate.start();

    // Job is mid-fetch; the key is still held
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gate.stats().verification.active, 1);
    assert_eq!(
        gate.enqueue_verification("app-strong").unwrap(),
        Enqueued::Duplicate("verify-app-strong".to_string())
    );

    gate.wait_idle().await;
    assert_eq!(github.calls(), 1);
    assert_eq!(gate.stats().verification.completed, 1);

    // Terminal state releases the key
    assert!(gate.enqueue_verification("app-strong").unwrap().is_added());
    gate.wait_idle().await;
    assert_eq!(github.calls(), 2);

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_commits_retry_then_land_in_dead_set() {
    let inner = seeded_store();
    let store = Arc::new(FlakyStore {
        inner: inner.clone(),
        failing: AtomicBool::new(true),
        commits: AtomicU32::new(0),
    });
    let gate = build_gate(store.clone(), default_github());
    gate.start();

    gate.enqueue_verification("app-strong").unwrap();
    gate.wait_idle().await;

    let stats = gate.stats().verification;
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.exhausted, 1);
    let dead = gate.dead_verifications();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.id, "verify-app-strong");
    assert!(dead[0].error.contains("connection reset"));

    // Nothing was written while the store was failing
    let application = inner.application("app-strong").unwrap();
    assert_eq!(application.status, ApplicationStatus::Processing);
    assert_eq!(application.score, None);
    assert_eq!(inner.user("strong").unwrap().status, UserStatus::Pending);

    store.failing.store(false, Ordering::SeqCst);
    assert!(gate
        .retry_dead_verification("verify-app-strong")
        .unwrap()
        .is_added());
    gate.wait_idle().await;

    assert_eq!(
        inner.application("app-strong").unwrap().status,
        ApplicationStatus::Approved
    );
    assert!(gate.dead_verifications().is_empty());

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_application_is_dropped() {
    let store = seeded_store();
    let gate = build_gate(store, default_github());
    gate.start();

    gate.enqueue_verification("app-deleted").unwrap();
    gate.wait_idle().await;

    let stats = gate.stats().verification;
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.dead, 0);

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn decision_for_missing_user_is_dropped() {
    let store = seeded_store();
    store.insert_application(
        Application::new("app-orphan", "ghost-user")
            .with_codeforces("legend")
            .with_status(ApplicationStatus::Processing),
    );
    let gate = build_gate(store.clone(), default_github());
    gate.start();

    gate.enqueue_verification("app-orphan").unwrap();
    gate.wait_idle().await;

    let stats = gate.stats().verification;
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.exhausted, 0);
    assert_eq!(stats.retried, 0);
    assert!(gate.dead_verifications().is_empty());

    let application = store.application("app-orphan").unwrap();
    assert_eq!(application.status, ApplicationStatus::Processing);
    assert_eq!(application.score, None);

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn weight_edit_then_backfill_rescores_review_queue() {
    let store = seeded_store();
    let gate = build_gate(store.clone(), default_github());
    gate.start();

    gate.enqueue_verification("app-mixed").unwrap();
    gate.wait_idle().await;
    assert_eq!(
        store.application("app-mixed").unwrap().status,
        ApplicationStatus::UnderReview
    );

    // Drop competitive rating from the score entirely
    let patch = WeightPatch {
        weight: Some(0.0),
        ..Default::default()
    };
    let row = gate.update_weight(CODEFORCES_RATING, &patch).await.unwrap();
    assert_eq!(row.weight, 0.0);

    let report = gate.backfill(None).await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.enqueued, 1);
    gate.wait_idle().await;

    let application = store.application("app-mixed").unwrap();
    assert_eq!(application.score, Some(100.0));
    assert_eq!(application.status, ApplicationStatus::Approved);
    assert_eq!(store.user("mixed").unwrap().status, UserStatus::Approved);

    gate.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_failures_back_off_without_touching_status() {
    let store = seeded_store();
    // "weak" has no scripted GitHub value, so every fetch fails
    let github = default_github();
    let gate = build_gate(store.clone(), github.clone());

    let outcome = gate.refresh_now("weak", Provider::SourceControl).await;
    assert!(outcome.is_err());
    let outcome = gate
        .refresh_now("weak", Provider::SourceControl)
        .await
        .unwrap();
    assert_eq!(outcome, RefreshOutcome::Throttled);
    assert_eq!(github.calls(), 1);
    assert_eq!(store.user("weak").unwrap().status, UserStatus::Pending);

    let mut seen = Vec::new();
    for user in ["strong", "mixed"] {
        gate.refresh_now(user, Provider::SourceControl).await.unwrap();
        if let Some(cached) = gate.cached_signal(user, Provider::SourceControl).await.unwrap() {
            seen.push(format!("{}={}", user, cached.raw_value));
        }
    }
    assert_eq!(seen, vec!["strong=1000", "mixed=640"]);
}
