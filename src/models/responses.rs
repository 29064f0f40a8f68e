use crate::core::engine::BatchMetrics;
use crate::models::domain::CompatibilityResult;
use serde::{Deserialize, Serialize};

/// Response for the batch scoring endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScoreResponse {
    pub subject_id: String,
    pub results: Vec<CompatibilityResult>,
    pub metrics: BatchMetrics,
}

/// Response for the ranking endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankResponse {
    pub subject_id: String,
    pub results: Vec<CompatibilityResult>,
    pub metrics: BatchMetrics,
    pub pool_size: usize,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
