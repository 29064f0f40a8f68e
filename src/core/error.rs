use crate::services::ResolveError;
use thiserror::Error;

/// Errors surfaced by the compatibility engine
///
/// Inside a batch these are absorbed into the neutral default; only the
/// single-pair and subject-level operations return them to the caller.
#[derive(Debug, Error)]
pub enum CompatError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl From<ResolveError> for CompatError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(id) => CompatError::NotFound(id),
            ResolveError::Upstream(msg) => CompatError::Upstream(msg),
        }
    }
}
