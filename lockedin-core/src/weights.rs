//! Scoring weights
//!
//! Weights are owned by administrators and persisted as loosely typed rows.
//! Rows are validated into [`WeightConfig`] before any scoring math sees
//! them, so a malformed row can never push NaN into a score.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::{CODEFORCES_RATING, GITHUB_CONTRIBUTIONS, LEETCODE_PROBLEMS, PORTFOLIO_QUALITY};

/// Weight row as stored by the persistence layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub key: String,
    pub weight: f64,
    pub threshold: f64,
    pub minimum: f64,
    #[serde(default)]
    pub description: String,
}

/// Validated weight entry used by the scoring engine
///
/// Deserialization goes through [`WeightRow`] validation, so cached copies
/// are checked again on the way back in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WeightRow")]
pub struct WeightConfig {
    /// Signal key this weight applies to
    pub key: String,
    /// Relative importance, within [0, 1]
    pub weight: f64,
    /// Raw value that normalizes to 100
    pub threshold: f64,
    /// Raw value that normalizes to 0
    pub minimum: f64,
}

/// Reasons a weight row is rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeightError {
    #[error("weight row has an empty key")]
    EmptyKey,

    #[error("weight for '{key}' must be within [0, 1], got {weight}")]
    WeightOutOfRange { key: String, weight: f64 },

    #[error("{field} for '{key}' is not a finite number")]
    NotFinite { key: String, field: &'static str },

    #[error("duplicate weight key '{0}'")]
    DuplicateKey(String),
}

impl WeightConfig {
    pub fn new(
        key: impl Into<String>,
        weight: f64,
        threshold: f64,
        minimum: f64,
    ) -> Result<Self, WeightError> {
        let config = Self {
            key: key.into(),
            weight,
            threshold,
            minimum,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WeightError> {
        if self.key.trim().is_empty() {
            return Err(WeightError::EmptyKey);
        }

        for (field, value) in [
            ("weight", self.weight),
            ("threshold", self.threshold),
            ("minimum", self.minimum),
        ] {
            if !value.is_finite() {
                return Err(WeightError::NotFinite {
                    key: self.key.clone(),
                    field,
                });
            }
        }

        if !(0.0..=1.0).contains(&self.weight) {
            return Err(WeightError::WeightOutOfRange {
                key: self.key.clone(),
                weight: self.weight,
            });
        }

        Ok(())
    }
}

impl TryFrom<WeightRow> for WeightConfig {
    type Error = WeightError;

    fn try_from(row: WeightRow) -> Result<Self, Self::Error> {
        WeightConfig::new(row.key, row.weight, row.threshold, row.minimum)
    }
}

/// Validate a full set of stored rows, rejecting the set on the first bad row
pub fn validate_rows(rows: &[WeightRow]) -> Result<Vec<WeightConfig>, WeightError> {
    let mut seen = HashSet::new();
    let mut configs = Vec::with_capacity(rows.len());

    for row in rows {
        let config = WeightConfig::try_from(row.clone())?;
        if !seen.insert(config.key.clone()) {
            return Err(WeightError::DuplicateKey(config.key));
        }
        configs.push(config);
    }

    Ok(configs)
}

/// Partial administrative edit of one weight row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightPatch {
    pub weight: Option<f64>,
    pub threshold: Option<f64>,
    pub minimum: Option<f64>,
}

impl WeightPatch {
    pub fn is_empty(&self) -> bool {
        self.weight.is_none() && self.threshold.is_none() && self.minimum.is_none()
    }

    /// Apply the patch to a row, returning the validated result
    pub fn apply(&self, row: &WeightRow) -> Result<WeightRow, WeightError> {
        let updated = WeightRow {
            key: row.key.clone(),
            weight: self.weight.unwrap_or(row.weight),
            threshold: self.threshold.unwrap_or(row.threshold),
            minimum: self.minimum.unwrap_or(row.minimum),
            description: row.description.clone(),
        };
        WeightConfig::try_from(updated.clone())?;
        Ok(updated)
    }
}

/// Weight rows a fresh deployment is seeded with
pub fn default_weight_rows() -> Vec<WeightRow> {
    vec![
        WeightRow {
            key: GITHUB_CONTRIBUTIONS.to_string(),
            weight: 0.35,
            threshold: 1000.0,
            minimum: 100.0,
            description: "GitHub contributions in the last year. 1000+ scores 100.".to_string(),
        },
        WeightRow {
            key: CODEFORCES_RATING.to_string(),
            weight: 0.25,
            threshold: 2100.0,
            minimum: 1200.0,
            description: "Peak Codeforces rating. 2100+ scores 100.".to_string(),
        },
        WeightRow {
            key: LEETCODE_PROBLEMS.to_string(),
            weight: 0.25,
            threshold: 500.0,
            minimum: 50.0,
            description: "Total LeetCode problems solved. 500+ scores 100.".to_string(),
        },
        WeightRow {
            key: PORTFOLIO_QUALITY.to_string(),
            weight: 0.15,
            threshold: 100.0,
            minimum: 20.0,
            description: "Manual portfolio review score (0-100). Assigned during human review."
                .to_string(),
        },
    ]
}
