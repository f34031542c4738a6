//! Gate configuration
//!
//! Loaded from TOML; every section is optional and falls back to the
//! production defaults. Scoring thresholds can be overridden from the
//! environment (`SCORING_PASS_THRESHOLD`, `SCORING_AUTO_APPROVE_THRESHOLD`,
//! `SCORING_AUTO_REJECT_THRESHOLD`).
//!
//! ```toml
//! fallback_to_cached_signals = true
//!
//! [scoring]
//! pass = 70.0
//! auto_approve = 90.0
//! auto_reject = 30.0
//!
//! [refresh_queue]
//! concurrency = 2
//! limiter = { max = 5, window_secs = 60 }
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use lockedin_core::{ScoringThresholds, MAX_SCORE, MIN_SCORE};
use lockedin_providers::ProviderConfig;

use crate::backoff::BackoffConfig;
use crate::limiter::LimiterConfig;
use crate::queue::QueueConfig;
use crate::weights_cache::TtlConfig;

pub const ENV_PASS_THRESHOLD: &str = "SCORING_PASS_THRESHOLD";
pub const ENV_AUTO_APPROVE_THRESHOLD: &str = "SCORING_AUTO_APPROVE_THRESHOLD";
pub const ENV_AUTO_REJECT_THRESHOLD: &str = "SCORING_AUTO_REJECT_THRESHOLD";

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{var} must be a number, got {value:?}")]
    InvalidOverride { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the gate needs to run
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub scoring: ScoringThresholds,
    pub weights_cache: TtlConfig,
    pub signal_cache: TtlConfig,
    pub backoff: BackoffConfig,
    pub verification_queue: QueueConfig,
    pub refresh_queue: QueueConfig,
    pub providers: ProviderConfig,
    /// Score with the last refreshed value when a live fetch fails
    pub fallback_to_cached_signals: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringThresholds::default(),
            weights_cache: TtlConfig::weights(),
            signal_cache: TtlConfig::signals(),
            backoff: BackoffConfig::default(),
            verification_queue: QueueConfig::verification(),
            refresh_queue: QueueConfig::refresh(),
            providers: ProviderConfig::default(),
            fallback_to_cached_signals: false,
        }
    }
}

/// Partial queue section; unset fields keep that queue's defaults
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueueSection {
    concurrency: Option<usize>,
    attempts: Option<u32>,
    retry_base_secs: Option<u64>,
    limiter: Option<LimiterSection>,
    stall_timeout_secs: Option<u64>,
    dead_letter_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LimiterSection {
    Enabled(LimiterConfig),
    /// `limiter = false` turns rate limiting off
    Toggle(bool),
}

impl QueueSection {
    fn resolve(self, base: QueueConfig) -> Result<QueueConfig, ConfigLoadError> {
        let limiter = match self.limiter {
            None => base.limiter,
            Some(LimiterSection::Enabled(limiter)) => Some(limiter),
            Some(LimiterSection::Toggle(false)) => None,
            Some(LimiterSection::Toggle(true)) => {
                return Err(ConfigLoadError::Invalid(
                    "limiter = true needs a { max, window_secs } table".to_string(),
                ))
            }
        };

        Ok(QueueConfig {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            attempts: self.attempts.unwrap_or(base.attempts),
            retry_base_secs: self.retry_base_secs.unwrap_or(base.retry_base_secs),
            limiter,
            stall_timeout_secs: self.stall_timeout_secs.unwrap_or(base.stall_timeout_secs),
            dead_letter_capacity: self
                .dead_letter_capacity
                .unwrap_or(base.dead_letter_capacity),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct TtlSection {
    ttl_secs: Option<u64>,
}

impl TtlSection {
    fn resolve(self, base: TtlConfig) -> TtlConfig {
        TtlConfig::new(self.ttl_secs.unwrap_or(base.ttl_secs))
    }
}

/// On-disk shape
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GateFile {
    #[serde(default)]
    fallback_to_cached_signals: Option<bool>,
    #[serde(default)]
    scoring: Option<ScoringThresholds>,
    #[serde(default)]
    weights_cache: Option<TtlSection>,
    #[serde(default)]
    signal_cache: Option<TtlSection>,
    #[serde(default)]
    backoff: Option<BackoffConfig>,
    #[serde(default)]
    verification_queue: Option<QueueSection>,
    #[serde(default)]
    refresh_queue: Option<QueueSection>,
    #[serde(default)]
    providers: Option<ProviderConfig>,
}

impl GateConfig {
    /// Parse a TOML document; validation is left to the caller
    pub fn from_toml(content: &str) -> Result<Self, ConfigLoadError> {
        let file: GateFile = toml::from_str(content)?;
        let defaults = GateConfig::default();

        Ok(Self {
            scoring: file.scoring.unwrap_or(defaults.scoring),
            weights_cache: file
                .weights_cache
                .unwrap_or_default()
                .resolve(defaults.weights_cache),
            signal_cache: file
                .signal_cache
                .unwrap_or_default()
                .resolve(defaults.signal_cache),
            backoff: file.backoff.unwrap_or(defaults.backoff),
            verification_queue: file
                .verification_queue
                .unwrap_or_default()
                .resolve(defaults.verification_queue)?,
            refresh_queue: file
                .refresh_queue
                .unwrap_or_default()
                .resolve(defaults.refresh_queue)?,
            providers: file.providers.unwrap_or(defaults.providers),
            fallback_to_cached_signals: file
                .fallback_to_cached_signals
                .unwrap_or(defaults.fallback_to_cached_signals),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// File (when given) plus environment overrides, validated
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply threshold overrides from a variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |var: &'static str| -> Result<Option<f64>, ConfigLoadError> {
            match lookup(var) {
                Some(value) => value
                    .trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| ConfigLoadError::InvalidOverride { var, value }),
                None => Ok(None),
            }
        };

        if let Some(pass) = parse(ENV_PASS_THRESHOLD)? {
            self.scoring.pass = pass;
        }
        if let Some(approve) = parse(ENV_AUTO_APPROVE_THRESHOLD)? {
            self.scoring.auto_approve = approve;
        }
        if let Some(reject) = parse(ENV_AUTO_REJECT_THRESHOLD)? {
            self.scoring.auto_reject = reject;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let thresholds = [
            ("scoring.pass", self.scoring.pass),
            ("scoring.auto_approve", self.scoring.auto_approve),
            ("scoring.auto_reject", self.scoring.auto_reject),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&value) {
                return Err(ConfigLoadError::Invalid(format!(
                    "{} must be within [{}, {}], got {}",
                    name, MIN_SCORE, MAX_SCORE, value
                )));
            }
        }
        if self.scoring.auto_reject > self.scoring.auto_approve {
            return Err(ConfigLoadError::Invalid(format!(
                "scoring.auto_reject ({}) exceeds scoring.auto_approve ({})",
                self.scoring.auto_reject, self.scoring.auto_approve
            )));
        }

        for (name, queue) in [
            ("verification_queue", &self.verification_queue),
            ("refresh_queue", &self.refresh_queue),
        ] {
            if queue.concurrency == 0 {
                return Err(ConfigLoadError::Invalid(format!(
                    "{}.concurrency must be at least 1",
                    name
                )));
            }
            if queue.attempts == 0 {
                return Err(ConfigLoadError::Invalid(format!(
                    "{}.attempts must be at least 1",
                    name
                )));
            }
            if let Some(limiter) = &queue.limiter {
                if limiter.max == 0 || limiter.window_secs == 0 {
                    return Err(ConfigLoadError::Invalid(format!(
                        "{}.limiter needs a positive max and window",
                        name
                    )));
                }
            }
        }

        if self.backoff.initial_delay_secs == 0
            || self.backoff.max_delay_secs < self.backoff.initial_delay_secs
        {
            return Err(ConfigLoadError::Invalid(
                "backoff delays must satisfy 0 < initial_delay_secs <= max_delay_secs"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
