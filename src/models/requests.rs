use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to score a single pair
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScoreRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "subject_id", rename = "subjectId")]
    pub subject_id: String,
    #[validate(length(min = 1))]
    #[serde(alias = "candidate_id", rename = "candidateId")]
    pub candidate_id: String,
    #[serde(default = "default_use_cache")]
    #[serde(alias = "use_cache", rename = "useCache")]
    pub use_cache: bool,
}

/// Request to score a list of candidates against one subject
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchScoreRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "subject_id", rename = "subjectId")]
    pub subject_id: String,
    #[validate(length(max = 1000))]
    #[serde(default)]
    #[serde(alias = "candidate_ids", rename = "candidateIds")]
    pub candidate_ids: Vec<String>,
    #[serde(default = "default_use_cache")]
    #[serde(alias = "use_cache", rename = "useCache")]
    pub use_cache: bool,
    #[validate(range(min = 1, max = 200))]
    #[serde(alias = "max_batch_size", rename = "maxBatchSize")]
    pub max_batch_size: Option<usize>,
    #[validate(range(min = 1, max = 10000))]
    #[serde(alias = "per_item_timeout_ms", rename = "perItemTimeoutMs")]
    pub per_item_timeout_ms: Option<u64>,
    #[validate(range(min = 1, max = 60000))]
    #[serde(alias = "deadline_ms", rename = "deadlineMs")]
    pub deadline_ms: Option<u64>,
}

/// Request to rank the subject's candidate pool
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RankRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "subject_id", rename = "subjectId")]
    pub subject_id: String,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_limit")]
    pub limit: u16,
    #[validate(range(min = 0.0, max = 100.0))]
    #[serde(default)]
    #[serde(alias = "min_combined_score", rename = "minCombinedScore")]
    pub min_combined_score: f64,
    #[serde(default)]
    #[serde(alias = "exclude_user_ids", rename = "excludeUserIds")]
    pub exclude_user_ids: Vec<String>,
    #[serde(default = "default_use_cache")]
    #[serde(alias = "use_cache", rename = "useCache")]
    pub use_cache: bool,
    #[validate(range(min = 1, max = 60000))]
    #[serde(alias = "deadline_ms", rename = "deadlineMs")]
    pub deadline_ms: Option<u64>,
}

fn default_limit() -> u16 {
    20
}

fn default_use_cache() -> bool {
    true
}
