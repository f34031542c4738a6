//! Application and user records as seen by the scoring pipeline
//!
//! Both entities are owned by the persistence layer; the pipeline only reads
//! proof identifiers and writes the scoring outcome and status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{Credential, Decision, Provider, SignalBreakdown};

/// Application lifecycle
///
/// `Pending → Processing` happens when the verification job is enqueued;
/// the verification pipeline moves it to one of the three decision states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
    UnderReview,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::Processing => "PROCESSING",
            ApplicationStatus::Approved => "APPROVED",
            ApplicationStatus::Rejected => "REJECTED",
            ApplicationStatus::UnderReview => "UNDER_REVIEW",
        }
    }
}

impl From<Decision> for ApplicationStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => ApplicationStatus::Approved,
            Decision::Rejected => ApplicationStatus::Rejected,
            Decision::UnderReview => ApplicationStatus::UnderReview,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised status name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown application status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ApplicationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(ApplicationStatus::Pending),
            "PROCESSING" => Ok(ApplicationStatus::Processing),
            "APPROVED" => Ok(ApplicationStatus::Approved),
            "REJECTED" => Ok(ApplicationStatus::Rejected),
            "UNDER_REVIEW" => Ok(ApplicationStatus::UnderReview),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Account admission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Pending,
    Approved,
    Rejected,
}

impl UserStatus {
    /// Account status implied by an automatic decision; `None` for review
    pub fn from_decision(decision: Decision) -> Option<UserStatus> {
        match decision {
            Decision::Approved => Some(UserStatus::Approved),
            Decision::Rejected => Some(UserStatus::Rejected),
            Decision::UnderReview => None,
        }
    }
}

/// Admission application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub user_id: String,
    pub github_url: Option<String>,
    pub codeforces_handle: Option<String>,
    pub leetcode_handle: Option<String>,
    pub portfolio_url: Option<String>,
    pub status: ApplicationStatus,
    pub score: Option<f64>,
    pub score_breakdown: Option<BTreeMap<String, SignalBreakdown>>,
    pub passing_threshold: Option<f64>,
}

impl Application {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            github_url: None,
            codeforces_handle: None,
            leetcode_handle: None,
            portfolio_url: None,
            status: ApplicationStatus::Pending,
            score: None,
            score_breakdown: None,
            passing_threshold: None,
        }
    }

    pub fn with_github(mut self, url: &str) -> Self {
        self.github_url = Some(url.to_string());
        self
    }

    pub fn with_codeforces(mut self, handle: &str) -> Self {
        self.codeforces_handle = Some(handle.to_string());
        self
    }

    pub fn with_leetcode(mut self, handle: &str) -> Self {
        self.leetcode_handle = Some(handle.to_string());
        self
    }

    pub fn with_portfolio(mut self, url: &str) -> Self {
        self.portfolio_url = Some(url.to_string());
        self
    }

    pub fn with_status(mut self, status: ApplicationStatus) -> Self {
        self.status = status;
        self
    }

    /// Proof identifier submitted for a provider, if any
    pub fn proof_for(&self, provider: Provider) -> Option<&str> {
        let proof = match provider {
            Provider::SourceControl => self.github_url.as_deref(),
            Provider::CompetitiveRating => self.codeforces_handle.as_deref(),
            Provider::ProblemCount => self.leetcode_handle.as_deref(),
        };
        proof.map(str::trim).filter(|p| !p.is_empty())
    }

    /// Providers this application carries proof for
    pub fn proven_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.proof_for(*p).is_some())
            .collect()
    }
}

/// User account, limited to what scoring and refresh need
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub status: UserStatus,
    pub github_username: Option<String>,
    pub codeforces_handle: Option<String>,
    pub leetcode_handle: Option<String>,
    /// Source-control credential, already decrypted by the store
    pub github_token: Option<Credential>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: UserStatus::Pending,
            github_username: None,
            codeforces_handle: None,
            leetcode_handle: None,
            github_token: None,
        }
    }

    pub fn with_handle(mut self, provider: Provider, handle: &str) -> Self {
        let handle = Some(handle.to_string());
        match provider {
            Provider::SourceControl => self.github_username = handle,
            Provider::CompetitiveRating => self.codeforces_handle = handle,
            Provider::ProblemCount => self.leetcode_handle = handle,
        }
        self
    }

    pub fn with_github_token(mut self, token: Credential) -> Self {
        self.github_token = Some(token);
        self
    }

    /// Handle registered for a provider, if any
    pub fn handle_for(&self, provider: Provider) -> Option<&str> {
        let handle = match provider {
            Provider::SourceControl => self.github_username.as_deref(),
            Provider::CompetitiveRating => self.codeforces_handle.as_deref(),
            Provider::ProblemCount => self.leetcode_handle.as_deref(),
        };
        handle.map(str::trim).filter(|h| !h.is_empty())
    }

    /// Credential usable with the given provider
    pub fn credential_for(&self, provider: Provider) -> Option<&Credential> {
        match provider {
            Provider::SourceControl => self.github_token.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_for_ignores_blank() {
        let app = Application::new("app-1", "user-1")
            .with_github("  ")
            .with_codeforces("tourist");

        assert_eq!(app.proof_for(Provider::SourceControl), None);
        assert_eq!(app.proof_for(Provider::CompetitiveRating), Some("tourist"));
        assert_eq!(app.proven_providers(), vec![Provider::CompetitiveRating]);
    }

    #[test]
    fn test_status_from_decision() {
        assert_eq!(
            ApplicationStatus::from(Decision::UnderReview),
            ApplicationStatus::UnderReview
        );
        assert_eq!(UserStatus::from_decision(Decision::UnderReview), None);
        assert_eq!(
            UserStatus::from_decision(Decision::Rejected),
            Some(UserStatus::Rejected)
        );
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            "under-review".parse::<ApplicationStatus>().unwrap(),
            ApplicationStatus::UnderReview
        );
        assert!("archived".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn test_user_credential_only_for_source_control() {
        let user = User::new("u").with_github_token(Credential::new("t"));
        assert!(user.credential_for(Provider::SourceControl).is_some());
        assert!(user.credential_for(Provider::ProblemCount).is_none());
    }
}
