//! Pipeline error taxonomy
//!
//! Only [`PipelineError::NotFound`] is fatal. Everything else is handed back
//! to the job queue, which retries it until attempts run out.

use thiserror::Error;

use lockedin_core::WeightError;
use lockedin_providers::ProviderError;

use crate::cache::CacheError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Referenced record does not exist; retrying cannot help
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// The decision write failed
    #[error("transaction failed: {0}")]
    Transaction(#[source] StoreError),

    /// Weights could not be loaded or are malformed
    #[error("scoring configuration unavailable: {0}")]
    Config(String),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A refresh fetch failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A job attempt ran past the stall timeout
    #[error("job stalled after {0:?}")]
    Stalled(std::time::Duration),

    /// The handler panicked mid-attempt
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether the queue should schedule another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::NotFound { .. })
    }
}

impl From<WeightError> for PipelineError {
    fn from(err: WeightError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => PipelineError::NotFound { entity, id },
            other => PipelineError::Transaction(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockedin_core::Provider;
    use lockedin_providers::ProviderFailure;

    #[test]
    fn test_only_not_found_is_fatal() {
        assert!(!PipelineError::not_found("application", "x").is_retryable());
        assert!(PipelineError::Transaction(StoreError::Unavailable("down".into())).is_retryable());
        assert!(PipelineError::Config("bad row".into()).is_retryable());
        assert!(PipelineError::Provider(ProviderError::new(
            Provider::ProblemCount,
            ProviderFailure::Timeout
        ))
        .is_retryable());
        assert!(PipelineError::Stalled(std::time::Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_store_not_found_stays_fatal() {
        let err: PipelineError = StoreError::NotFound {
            entity: "application",
            id: "a".into(),
        }
        .into();
        assert!(!err.is_retryable());
    }
}
