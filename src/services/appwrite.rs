use crate::models::Profile;
use crate::services::collaborators::{CandidatePoolResolver, PoolFilters, ProfileResolver, ResolveError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Appwrite caps a single listing at this many documents
const MAX_PAGE_SIZE: usize = 5000;

/// Errors that can occur when interacting with Appwrite
#[derive(Debug, Error)]
pub enum AppwriteError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    ApiError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: invalid API key or token")]
    Unauthorized,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl From<AppwriteError> for ResolveError {
    fn from(err: AppwriteError) -> Self {
        match err {
            AppwriteError::NotFound(id) => ResolveError::NotFound(id),
            other => ResolveError::Upstream(other.to_string()),
        }
    }
}

/// Appwrite API client
///
/// Reads profile documents (natal chart and questionnaire attributes) and
/// lists candidate IDs for ranking.
pub struct AppwriteClient {
    base_url: String,
    api_key: String,
    project_id: String,
    database_id: String,
    client: Client,
    profiles_collection: String,
}

impl AppwriteClient {
    /// Create a new Appwrite client
    pub fn new(
        base_url: String,
        api_key: String,
        project_id: String,
        database_id: String,
        profiles_collection: String,
        timeout: Duration,
    ) -> Result<Self, AppwriteError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            api_key,
            project_id,
            database_id,
            client,
            profiles_collection,
        })
    }

    fn documents_url(&self, queries: &[String]) -> String {
        let mut url = format!(
            "{}/databases/{}/collections/{}/documents",
            self.base_url.trim_end_matches('/'),
            self.database_id,
            self.profiles_collection
        );

        for (i, query) in queries.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str("queries[]=");
            url.push_str(&urlencoding::encode(query));
        }

        url
    }

    async fn list_documents(&self, queries: &[String]) -> Result<Vec<Value>, AppwriteError> {
        let url = self.documents_url(queries);
        tracing::debug!("Listing documents: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Appwrite-Key", &self.api_key)
            .header("X-Appwrite-Project", &self.project_id)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AppwriteError::Unauthorized);
            }
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read body".to_string());
                tracing::error!("Appwrite listing failed: {} - {}", status, body);
                return Err(AppwriteError::ApiError(format!(
                    "Failed to list documents: {}",
                    status
                )));
            }
        }

        let json: Value = response.json().await?;

        json.get("documents")
            .and_then(|d| d.as_array())
            .cloned()
            .ok_or_else(|| AppwriteError::InvalidResponse("Missing documents array".into()))
    }

    /// Get a single profile by user ID
    pub async fn get_profile(&self, user_id: &str) -> Result<Profile, AppwriteError> {
        let queries = vec![equal("userId", user_id), "limit(1)".to_string()];
        let documents = self.list_documents(&queries).await?;

        let doc = documents
            .first()
            .ok_or_else(|| AppwriteError::NotFound(user_id.to_string()))?;

        // Extract profile data from Appwrite document format
        let data = doc.get("data").unwrap_or(doc);

        serde_json::from_value(data.clone())
            .map_err(|e| AppwriteError::InvalidResponse(format!("Failed to parse profile: {}", e)))
    }

    /// Query active candidate IDs, excluding the subject and any excluded IDs
    pub async fn query_candidate_ids(
        &self,
        user_id: &str,
        exclude_ids: &[String],
        limit: usize,
    ) -> Result<Vec<String>, AppwriteError> {
        let mut queries = vec![
            r#"equal("isActive", [true])"#.to_string(),
            not_equal("userId", user_id),
            r#"select(["userId"])"#.to_string(),
            format!("limit({})", limit.clamp(1, MAX_PAGE_SIZE)),
        ];
        queries.extend(exclude_ids.iter().map(|id| not_equal("userId", id)));

        let documents = self.list_documents(&queries).await?;

        let ids: Vec<String> = documents
            .iter()
            .filter_map(|doc| {
                let data = doc.get("data").unwrap_or(doc);
                data.get("userId").and_then(|v| v.as_str()).map(str::to_string)
            })
            .filter(|id| id != user_id && !exclude_ids.contains(id))
            .take(limit)
            .collect();

        tracing::debug!("Queried {} candidate IDs for {}", ids.len(), user_id);

        Ok(ids)
    }
}

#[async_trait]
impl ProfileResolver for AppwriteClient {
    async fn resolve(&self, user_id: &str) -> Result<Profile, ResolveError> {
        Ok(self.get_profile(user_id).await?)
    }
}

#[async_trait]
impl CandidatePoolResolver for AppwriteClient {
    async fn candidates(
        &self,
        subject_id: &str,
        filters: &PoolFilters,
    ) -> Result<Vec<String>, ResolveError> {
        Ok(self
            .query_candidate_ids(subject_id, &filters.exclude_user_ids, filters.limit)
            .await?)
    }
}

fn equal(attribute: &str, value: &str) -> String {
    format!("equal(\"{}\", [{}])", attribute, Value::String(value.to_string()))
}

fn not_equal(attribute: &str, value: &str) -> String {
    format!("notEqual(\"{}\", [{}])", attribute, Value::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base_url: String) -> AppwriteClient {
        AppwriteClient::new(
            base_url,
            "test_key".to_string(),
            "test_project".to_string(),
            "test_db".to_string(),
            "profiles".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_query_builders_escape_values() {
        assert_eq!(equal("userId", "abc"), r#"equal("userId", ["abc"])"#);
        assert_eq!(not_equal("userId", "a\"b"), r#"notEqual("userId", ["a\"b"])"#);
    }

    #[test]
    fn test_documents_url() {
        let client = client("https://appwrite.test/v1/".to_string());
        let url = client.documents_url(&["limit(1)".to_string()]);
        assert_eq!(
            url,
            "https://appwrite.test/v1/databases/test_db/collections/profiles/documents?queries[]=limit%281%29"
        );
    }

    #[tokio::test]
    async fn test_get_profile_parses_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/databases/test_db/collections/profiles/documents")
            .match_query(Matcher::Any)
            .match_header("X-Appwrite-Key", "test_key")
            .with_status(200)
            .with_body(
                r#"{"total": 1, "documents": [{
                    "$id": "doc1",
                    "userId": "u1",
                    "natalChart": "{\"sun\": 132.5}",
                    "questionnaire": {"q1": 3}
                }]}"#,
            )
            .create_async()
            .await;

        let profile = client(server.url()).get_profile("u1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(profile.user_id, "u1");
        assert!(profile.natal_chart.is_some());
        assert_eq!(profile.questionnaire["q1"], 3);
    }

    #[tokio::test]
    async fn test_get_profile_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/databases/test_db/collections/profiles/documents")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"total": 0, "documents": []}"#)
            .create_async()
            .await;

        let err = client(server.url()).resolve("ghost").await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_upstream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/databases/test_db/collections/profiles/documents")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = client(server.url()).resolve("u1").await.unwrap_err();
        assert!(matches!(err, ResolveError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_candidate_ids_exclude_subject() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/databases/test_db/collections/profiles/documents")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"total": 4, "documents": [
                    {"userId": "me"},
                    {"userId": "c1"},
                    {"userId": "seen"},
                    {"userId": "c2"}
                ]}"#,
            )
            .create_async()
            .await;

        let filters = PoolFilters {
            limit: 10,
            exclude_user_ids: vec!["seen".to_string()],
        };
        let ids = client(server.url()).candidates("me", &filters).await.unwrap();
        assert_eq!(ids, vec!["c1", "c2"]);
    }
}
