use crate::models::{Profile, QuestionnaireScore};
use crate::services::collaborators::{QuestionnaireScorer, ResolveError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Client for the external questionnaire-compatibility service
///
/// The scoring algorithm lives in that service; this client only forwards
/// both users' answers and reads back `{score, grade}`.
pub struct HttpQuestionnaireScorer {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreRequest<'a> {
    user_a: Participant<'a>,
    user_b: Participant<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Participant<'a> {
    user_id: &'a str,
    answers: &'a Value,
}

impl<'a> From<&'a Profile> for Participant<'a> {
    fn from(profile: &'a Profile) -> Self {
        Self {
            user_id: &profile.user_id,
            answers: &profile.questionnaire,
        }
    }
}

impl HttpQuestionnaireScorer {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl QuestionnaireScorer for HttpQuestionnaireScorer {
    async fn score(&self, a: &Profile, b: &Profile) -> Result<QuestionnaireScore, ResolveError> {
        let body = ScoreRequest {
            user_a: a.into(),
            user_b: b.into(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ResolveError::Upstream(format!("questionnaire request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ResolveError::Upstream(format!(
                "questionnaire service returned {}",
                response.status()
            )));
        }

        let score: QuestionnaireScore = response
            .json()
            .await
            .map_err(|e| ResolveError::Upstream(format!("invalid questionnaire response: {}", e)))?;

        tracing::debug!(
            "Questionnaire score {} <-> {}: {}",
            a.user_id,
            b.user_id,
            score.score
        );

        Ok(score)
    }
}
