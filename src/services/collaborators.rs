use crate::models::{Profile, QuestionnaireScore};
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the external collaborators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Loads the profile projection for a user; may be slow (database I/O)
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Result<Profile, ResolveError>;
}

/// Opaque questionnaire compatibility scorer
#[async_trait]
pub trait QuestionnaireScorer: Send + Sync {
    async fn score(&self, a: &Profile, b: &Profile) -> Result<QuestionnaireScore, ResolveError>;
}

/// Filters applied when fetching a candidate pool
#[derive(Debug, Clone, Default)]
pub struct PoolFilters {
    pub limit: usize,
    pub exclude_user_ids: Vec<String>,
}

/// Produces the ordered, bounded candidate pool for a subject
#[async_trait]
pub trait CandidatePoolResolver: Send + Sync {
    async fn candidates(
        &self,
        subject_id: &str,
        filters: &PoolFilters,
    ) -> Result<Vec<String>, ResolveError>;
}
