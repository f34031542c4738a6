//! Provider signals
//!
//! A signal is a single numeric measurement of developer activity taken from
//! one external provider. Signals are ephemeral:
//! - Provider adapters produce them
//! - The scoring engine consumes them immediately
//! - Only the derived score and breakdown are ever persisted

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Signal key for the yearly source-control contribution total
pub const GITHUB_CONTRIBUTIONS: &str = "github_contributions";

/// Signal key for the peak competitive-programming rating
pub const CODEFORCES_RATING: &str = "codeforces_rating";

/// Signal key for the total number of solved problems
pub const LEETCODE_PROBLEMS: &str = "leetcode_problems";

/// Signal key for the manually assigned portfolio score (no provider)
pub const PORTFOLIO_QUALITY: &str = "portfolio_quality";

/// External sources a signal can be acquired from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// Source-control activity (GitHub)
    SourceControl,
    /// Competitive-programming rating (Codeforces)
    CompetitiveRating,
    /// Problem-solving count (LeetCode)
    ProblemCount,
}

impl Provider {
    /// Every provider, in a stable order
    pub const ALL: [Provider; 3] = [
        Provider::SourceControl,
        Provider::CompetitiveRating,
        Provider::ProblemCount,
    ];

    /// Wire name used in job payloads and cache keys
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::SourceControl => "source-control",
            Provider::CompetitiveRating => "competitive-rating",
            Provider::ProblemCount => "problem-count",
        }
    }

    /// Weight key the provider's signal is scored under
    pub fn signal_key(self) -> &'static str {
        match self {
            Provider::SourceControl => GITHUB_CONTRIBUTIONS,
            Provider::CompetitiveRating => CODEFORCES_RATING,
            Provider::ProblemCount => LEETCODE_PROBLEMS,
        }
    }

    /// Reverse lookup from a weight key
    pub fn from_signal_key(key: &str) -> Option<Provider> {
        Provider::ALL.into_iter().find(|p| p.signal_key() == key)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised provider name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    /// Accepts wire names and the vendor names operators tend to type
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source-control" | "github" => Ok(Provider::SourceControl),
            "competitive-rating" | "codeforces" => Ok(Provider::CompetitiveRating),
            "problem-count" | "leetcode" => Ok(Provider::ProblemCount),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// One provider measurement, keyed to match a weight entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalInput {
    /// Weight key this signal is scored under
    pub key: String,
    /// Raw, un-normalized value as reported by the provider
    pub raw_value: f64,
}

impl SignalInput {
    pub fn new(key: impl Into<String>, raw_value: f64) -> Self {
        Self {
            key: key.into(),
            raw_value,
        }
    }

    /// Signal keyed for the given provider
    pub fn for_provider(provider: Provider, raw_value: f64) -> Self {
        Self::new(provider.signal_key(), raw_value)
    }
}

/// Opaque provider credential (e.g. an OAuth access token)
///
/// The value never appears in `Debug` output so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for building an authorization header
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_wire_names() {
        let json = serde_json::to_string(&Provider::CompetitiveRating).unwrap();
        assert_eq!(json, "\"competitive-rating\"");

        let parsed: Provider = serde_json::from_str("\"problem-count\"").unwrap();
        assert_eq!(parsed, Provider::ProblemCount);
    }

    #[test]
    fn test_provider_from_str_aliases() {
        assert_eq!("github".parse::<Provider>().unwrap(), Provider::SourceControl);
        assert_eq!(
            "Source-Control".parse::<Provider>().unwrap(),
            Provider::SourceControl
        );
        assert!("gitlab".parse::<Provider>().is_err());
    }

    #[test]
    fn test_signal_key_round_trip() {
        for provider in Provider::ALL {
            assert_eq!(Provider::from_signal_key(provider.signal_key()), Some(provider));
        }
        assert_eq!(Provider::from_signal_key(PORTFOLIO_QUALITY), None);
    }

    #[test]
    fn test_credential_is_redacted() {
        let credential = Credential::new("gho_secret");
        assert_eq!(format!("{:?}", credential), "Credential(***)");
        assert_eq!(credential.expose(), "gho_secret");
    }
}
