//! Scoring engine
//!
//! Pure, deterministic functions with no I/O:
//! - [`normalize`] maps a raw value onto 0..=100
//! - [`compute_score`] takes the weighted average of normalized signals
//! - [`derive_decision`] buckets a score into approve / reject / review

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    SignalInput, WeightConfig, DEFAULT_AUTO_APPROVE_THRESHOLD, DEFAULT_AUTO_REJECT_THRESHOLD,
    DEFAULT_PASS_THRESHOLD, MAX_SCORE, MIN_SCORE,
};

/// Per-signal contribution to a score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBreakdown {
    pub raw_value: f64,
    pub normalized_value: f64,
    pub weight: f64,
    pub weighted_contribution: f64,
}

/// Outcome of scoring one set of signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringResult {
    /// Weighted average, 0..=100, rounded to two decimals
    pub score: f64,
    /// Contributions of every signal that matched a weight
    pub breakdown: BTreeMap<String, SignalBreakdown>,
    pub passed: bool,
    pub passing_threshold: f64,
}

/// Tri-state admission outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
    UnderReview,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approved => "APPROVED",
            Decision::Rejected => "REJECTED",
            Decision::UnderReview => "UNDER_REVIEW",
        }
    }

    /// Whether the decision is final without a human in the loop
    pub fn is_automatic(self) -> bool {
        !matches!(self, Decision::UnderReview)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score thresholds applied by the verification pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringThresholds {
    /// Score needed for `passed`
    pub pass: f64,
    /// Scores at or above this are approved automatically
    pub auto_approve: f64,
    /// Scores below this are rejected automatically
    pub auto_reject: f64,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            pass: DEFAULT_PASS_THRESHOLD,
            auto_approve: DEFAULT_AUTO_APPROVE_THRESHOLD,
            auto_reject: DEFAULT_AUTO_REJECT_THRESHOLD,
        }
    }
}

impl ScoringThresholds {
    /// Score signals and derive the decision in one step
    pub fn evaluate(
        &self,
        signals: &[SignalInput],
        weights: &[WeightConfig],
    ) -> (ScoringResult, Decision) {
        let result = compute_score(signals, weights, self.pass);
        let decision = derive_decision(result.score, self.auto_approve, self.auto_reject);
        (result, decision)
    }
}

/// Linear normalization onto 0..=100
///
/// - `value <= minimum` → 0
/// - `value >= threshold` → 100
/// - otherwise linear interpolation
///
/// When `threshold <= minimum` the range is degenerate and the result is a
/// step: 100 at or above `threshold`, 0 below. NaN normalizes to 0.
pub fn normalize(value: f64, minimum: f64, threshold: f64) -> f64 {
    if value.is_nan() {
        return MIN_SCORE;
    }
    if threshold <= minimum {
        return if value >= threshold { MAX_SCORE } else { MIN_SCORE };
    }
    if value <= minimum {
        return MIN_SCORE;
    }
    if value >= threshold {
        return MAX_SCORE;
    }
    (value - minimum) / (threshold - minimum) * MAX_SCORE
}

/// Weighted average of normalized signals
///
/// `score = Σ(weight_i × normalized_i) / Σ(weight_i)` over the weights that
/// have a matching signal. Weights without a signal are skipped rather than
/// counted as zero. If nothing matched, or the matched weights sum to zero,
/// the score is 0.
pub fn compute_score(
    signals: &[SignalInput],
    weights: &[WeightConfig],
    passing_threshold: f64,
) -> ScoringResult {
    let mut breakdown = BTreeMap::new();
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for w in weights {
        // first signal wins when a provider reports the same key twice
        let Some(signal) = signals.iter().find(|s| s.key == w.key) else {
            continue;
        };

        let normalized_value = normalize(signal.raw_value, w.minimum, w.threshold);
        let weighted_contribution = w.weight * normalized_value;

        weighted_sum += weighted_contribution;
        total_weight += w.weight;

        breakdown.insert(
            w.key.clone(),
            SignalBreakdown {
                raw_value: signal.raw_value,
                normalized_value: round2(normalized_value),
                weight: w.weight,
                weighted_contribution: round2(weighted_contribution),
            },
        );
    }

    let score = if total_weight > 0.0 {
        (weighted_sum / total_weight).clamp(MIN_SCORE, MAX_SCORE)
    } else {
        MIN_SCORE
    };

    ScoringResult {
        score: round2(score),
        breakdown,
        passed: score >= passing_threshold,
        passing_threshold,
    }
}

/// Bucket a score: `>= auto_approve` approves, `< auto_reject` rejects,
/// everything in between escalates to a human.
pub fn derive_decision(score: f64, auto_approve: f64, auto_reject: f64) -> Decision {
    if score >= auto_approve {
        Decision::Approved
    } else if score < auto_reject {
        Decision::Rejected
    } else {
        Decision::UnderReview
    }
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}
