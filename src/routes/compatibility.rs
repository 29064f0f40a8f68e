use crate::core::{BatchRequest, CompatError, CompatibilityEngine, RankOptions};
use crate::models::{BatchScoreRequest, BatchScoreResponse, ErrorResponse, HealthResponse, RankRequest, RankResponse, ScoreRequest};
use actix_web::{web, HttpResponse, Responder};
use std::time::Duration;
use validator::Validate;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: CompatibilityEngine,
}

/// Configure all compatibility routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/compatibility/score", web::post().to(score_pair))
        .route("/compatibility/batch", web::post().to(score_batch))
        .route("/compatibility/rank", web::post().to(rank_candidates));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let stats = state.engine.cache().stats();
    tracing::debug!(
        "Cache stats: pairs hit rate {:.2}, profiles hit rate {:.2}, {} local entries",
        stats.pairs.hit_rate,
        stats.profiles.hit_rate,
        stats.local_entries
    );

    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Score a single pair
///
/// POST /api/v1/compatibility/score
///
/// Request body:
/// ```json
/// {
///   "subjectId": "string",
///   "candidateId": "string",
///   "useCache": true
/// }
/// ```
async fn score_pair(state: web::Data<AppState>, req: web::Json<ScoreRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    match state
        .engine
        .score_one(&req.subject_id, &req.candidate_id, req.use_cache)
        .await
    {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => error_response(&e),
    }
}

/// Score a list of candidates against one subject
///
/// POST /api/v1/compatibility/batch
///
/// Request body:
/// ```json
/// {
///   "subjectId": "string",
///   "candidateIds": ["string"],
///   "useCache": true,
///   "maxBatchSize": 50,
///   "perItemTimeoutMs": 300,
///   "deadlineMs": 500
/// }
/// ```
async fn score_batch(state: web::Data<AppState>, req: web::Json<BatchScoreRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    let req = req.into_inner();
    let request = BatchRequest {
        subject_id: req.subject_id.clone(),
        candidate_ids: req.candidate_ids,
        use_cache: req.use_cache,
        max_batch_size: req.max_batch_size,
        per_item_timeout: req.per_item_timeout_ms.map(Duration::from_millis),
        deadline: req.deadline_ms.map(Duration::from_millis),
    };

    match state.engine.score_batch(&request).await {
        Ok(outcome) => HttpResponse::Ok().json(BatchScoreResponse {
            subject_id: req.subject_id,
            results: outcome.results,
            metrics: outcome.metrics,
        }),
        Err(e) => error_response(&e),
    }
}

/// Rank the subject's candidate pool
///
/// POST /api/v1/compatibility/rank
///
/// Request body:
/// ```json
/// {
///   "subjectId": "string",
///   "limit": 20,
///   "minCombinedScore": 60,
///   "excludeUserIds": ["string"]
/// }
/// ```
async fn rank_candidates(state: web::Data<AppState>, req: web::Json<RankRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_failed(errors);
    }

    let req = req.into_inner();
    let options = RankOptions {
        limit: req.limit as usize,
        min_combined_score: req.min_combined_score,
        use_cache: req.use_cache,
        exclude_user_ids: req.exclude_user_ids,
        deadline: req.deadline_ms.map(Duration::from_millis),
    };

    match state.engine.rank_candidates(&req.subject_id, &options).await {
        Ok(ranked) => HttpResponse::Ok().json(RankResponse {
            subject_id: req.subject_id,
            results: ranked.results,
            metrics: ranked.metrics,
            pool_size: ranked.pool_size,
        }),
        Err(e) => error_response(&e),
    }
}

fn validation_failed(errors: validator::ValidationErrors) -> HttpResponse {
    tracing::info!("Validation failed: field_errors={:?}", errors);
    HttpResponse::BadRequest().json(ErrorResponse {
        error: "Validation failed".to_string(),
        message: errors.to_string(),
        status_code: 400,
    })
}

/// Map an engine error onto its HTTP response
pub fn error_response(err: &CompatError) -> HttpResponse {
    let (mut builder, error, status_code) = match err {
        CompatError::Validation(_) => (HttpResponse::BadRequest(), "Validation failed", 400),
        CompatError::NotFound(_) => (HttpResponse::NotFound(), "Profile not found", 404),
        CompatError::Timeout(_) => (HttpResponse::GatewayTimeout(), "Scoring timed out", 504),
        CompatError::Upstream(_) => (HttpResponse::BadGateway(), "Upstream failure", 502),
    };

    if status_code >= 500 {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::info!("Request rejected: {}", err);
    }

    builder.json(ErrorResponse {
        error: error.to_string(),
        message: err.to_string(),
        status_code,
    })
}
