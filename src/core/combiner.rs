use crate::core::error::CompatError;
use crate::models::{CompatibilityResult, Grade};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Blend weights and decision thresholds for the combined score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinerConfig {
    pub astrological_weight: f64,
    pub questionnaire_weight: f64,
    /// Minimum combined score for `meets_threshold`
    pub threshold: f64,
    /// Minimum priority score (0-1) for `is_recommended`
    pub recommendation_priority: f64,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            astrological_weight: 0.5,
            questionnaire_weight: 0.5,
            threshold: 60.0,
            recommendation_priority: 0.75,
        }
    }
}

/// Combined view of the astrological and questionnaire scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedScore {
    pub combined_score: f64,
    pub combined_grade: Grade,
    pub meets_threshold: bool,
    pub priority_score: f64,
    pub is_recommended: bool,
}

/// Merges the astrological score with the questionnaire score
#[derive(Debug, Clone, Copy)]
pub struct CompatibilityCombiner {
    config: CombinerConfig,
}

impl CompatibilityCombiner {
    pub fn new(config: CombinerConfig) -> Result<Self, CompatError> {
        let weights = [config.astrological_weight, config.questionnaire_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(CompatError::Validation(
                "blend weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(CompatError::Validation(
                "at least one blend weight must be positive".to_string(),
            ));
        }
        if !config.threshold.is_finite() || !config.recommendation_priority.is_finite() {
            return Err(CompatError::Validation(
                "thresholds must be finite".to_string(),
            ));
        }

        Ok(Self { config })
    }

    pub fn config(&self) -> &CombinerConfig {
        &self.config
    }

    /// Blend both scores (each 0-100) into the combined score and its decisions
    pub fn combine(&self, astrological: f64, questionnaire: f64) -> CombinedScore {
        let CombinerConfig {
            astrological_weight,
            questionnaire_weight,
            threshold,
            recommendation_priority,
        } = self.config;

        let blended = (astrological * astrological_weight + questionnaire * questionnaire_weight)
            / (astrological_weight + questionnaire_weight);
        let combined_score = round2(blended.clamp(0.0, 100.0));

        let meets_threshold = combined_score >= threshold;
        let priority_score = priority_for(combined_score);

        CombinedScore {
            combined_score,
            combined_grade: Grade::from_score(combined_score),
            meets_threshold,
            priority_score,
            is_recommended: meets_threshold && priority_score >= recommendation_priority,
        }
    }
}

/// Ordering priority in [0, 1]; strictly increasing in the combined score
#[inline]
pub fn priority_for(combined_score: f64) -> f64 {
    combined_score.clamp(0.0, 100.0) / 100.0
}

/// Ranking order: combined score descending, then candidate ID ascending
pub fn rank_order(a: &CompatibilityResult, b: &CompatibilityResult) -> Ordering {
    b.combined_score
        .partial_cmp(&a.combined_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

#[inline]
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
