use crate::core::chart::normalize_optional;
use crate::core::combiner::{rank_order, CompatibilityCombiner};
use crate::core::error::CompatError;
use crate::core::synastry::score_synastry;
use crate::models::{CompatibilityResult, Profile};
use crate::services::{CandidatePoolResolver, PairCache, PoolFilters, ProfileResolver, QuestionnaireScorer};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

/// Tuning knobs for batch scheduling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Candidates per sub-batch
    pub max_batch_size: usize,
    /// Hard limit for a single candidate's scoring task
    pub per_item_timeout: Duration,
    /// Considered candidates are capped at `max_batch_size * candidate_buffer_factor`
    pub candidate_buffer_factor: usize,
    /// In-flight tasks are capped at `available CPUs * concurrency_multiplier`
    pub concurrency_multiplier: usize,
    /// Upper bound for `RankOptions::limit`
    pub max_rank_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            per_item_timeout: Duration::from_millis(300),
            candidate_buffer_factor: 4,
            concurrency_multiplier: 8,
            max_rank_limit: 100,
        }
    }
}

/// Request to score many candidates against one subject
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub subject_id: String,
    pub candidate_ids: Vec<String>,
    pub use_cache: bool,
    /// Overrides `EngineSettings::max_batch_size`
    pub max_batch_size: Option<usize>,
    /// Overrides `EngineSettings::per_item_timeout`
    pub per_item_timeout: Option<Duration>,
    /// Advisory deadline for the whole batch, measured from the call
    pub deadline: Option<Duration>,
}

impl BatchRequest {
    pub fn new(subject_id: impl Into<String>, candidate_ids: Vec<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            candidate_ids,
            use_cache: true,
            max_batch_size: None,
            per_item_timeout: None,
            deadline: None,
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = Some(max_batch_size);
        self
    }

    pub fn with_per_item_timeout(mut self, timeout: Duration) -> Self {
        self.per_item_timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// How a single candidate's task finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    CacheHit,
    Computed,
    TimedOut,
    Failed,
}

impl TaskOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, TaskOutcome::CacheHit | TaskOutcome::Computed)
    }
}

/// Per-candidate report collected from the scoring tasks
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub result: CompatibilityResult,
    pub outcome: TaskOutcome,
    pub latency: Duration,
}

/// Aggregate metrics for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetrics {
    pub average_latency_ms: f64,
    pub cache_hit_rate: f64,
    pub success_rate: f64,
    pub total_latency_ms: f64,
    pub processed: usize,
    pub cache_hits: usize,
    /// Timeouts plus failures absorbed into the neutral default
    pub error_count: usize,
    pub timeout_count: usize,
    /// Candidates dropped because the batch deadline passed
    pub abandoned: usize,
}

/// Results of a batch, sorted by combined score descending
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<CompatibilityResult>,
    pub metrics: BatchMetrics,
}

/// Options for ranking a subject's candidate pool
#[derive(Debug, Clone)]
pub struct RankOptions {
    pub limit: usize,
    pub min_combined_score: f64,
    pub use_cache: bool,
    pub exclude_user_ids: Vec<String>,
    pub deadline: Option<Duration>,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            min_combined_score: 0.0,
            use_cache: true,
            exclude_user_ids: Vec::new(),
            deadline: None,
        }
    }
}

/// Top candidates for a subject
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidates {
    pub results: Vec<CompatibilityResult>,
    pub metrics: BatchMetrics,
    pub pool_size: usize,
}

/// Compatibility scoring service
///
/// Owns no global state: every collaborator is injected, so tests can swap
/// in fakes. Cloning is cheap and shares the cache and scheduler.
#[derive(Clone)]
pub struct CompatibilityEngine {
    profiles: Arc<dyn ProfileResolver>,
    questionnaire: Arc<dyn QuestionnaireScorer>,
    pool: Arc<dyn CandidatePoolResolver>,
    cache: Arc<PairCache>,
    combiner: CompatibilityCombiner,
    settings: EngineSettings,
    permits: Arc<Semaphore>,
}

impl CompatibilityEngine {
    pub fn new(
        profiles: Arc<dyn ProfileResolver>,
        questionnaire: Arc<dyn QuestionnaireScorer>,
        pool: Arc<dyn CandidatePoolResolver>,
        cache: Arc<PairCache>,
        combiner: CompatibilityCombiner,
        settings: EngineSettings,
    ) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        let permits = (cpus * settings.concurrency_multiplier).max(1);

        tracing::debug!("Compatibility engine allows {} in-flight scoring tasks", permits);

        Self {
            profiles,
            questionnaire,
            pool,
            cache,
            combiner,
            settings,
            permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<PairCache> {
        &self.cache
    }

    /// Score a single pair
    ///
    /// Unlike batch scoring, a missing profile, upstream failure or timeout
    /// is returned to the caller rather than replaced by the neutral default.
    pub async fn score_one(
        &self,
        subject_id: &str,
        candidate_id: &str,
        use_cache: bool,
    ) -> Result<CompatibilityResult, CompatError> {
        validate_pair(subject_id, candidate_id)?;

        if use_cache {
            if let Some(hit) = self.cache.get_pair(subject_id, candidate_id).await {
                tracing::debug!("Pair cache hit: {} <-> {}", subject_id, candidate_id);
                return Ok(hit);
            }
        }

        let timeout = self.settings.per_item_timeout;
        let work = async {
            let subject = self.resolve_profile(subject_id, use_cache).await?;
            self.compute_fresh(&subject, candidate_id, use_cache).await
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| CompatError::Timeout(timeout.as_millis() as u64))?
    }

    /// Score a batch of candidates against one subject
    ///
    /// Individual candidate failures and timeouts never fail the batch; each
    /// yields the neutral default and is counted in the metrics. Only a
    /// failure to resolve the subject itself is returned as an error.
    pub async fn score_batch(&self, request: &BatchRequest) -> Result<BatchOutcome, CompatError> {
        let started = Instant::now();
        let batch_id = Uuid::new_v4();

        let max_batch_size = request
            .max_batch_size
            .unwrap_or(self.settings.max_batch_size)
            .max(1);
        let per_item_timeout = request
            .per_item_timeout
            .unwrap_or(self.settings.per_item_timeout);
        let cap = max_batch_size.saturating_mul(self.settings.candidate_buffer_factor.max(1));

        let candidates = prepare_candidates(&request.subject_id, &request.candidate_ids, cap);
        if candidates.is_empty() {
            tracing::debug!("Batch {} has no candidates to score", batch_id);
            return Ok(BatchOutcome::default());
        }
        if request.subject_id.trim().is_empty() {
            return Err(CompatError::Validation("subject ID is empty".to_string()));
        }

        let subject = Arc::new(
            self.resolve_profile(&request.subject_id, request.use_cache)
                .await?,
        );
        let deadline = request.deadline.map(|d| started + d);

        tracing::debug!(
            "Batch {}: scoring {} candidates for {} in sub-batches of {}",
            batch_id,
            candidates.len(),
            request.subject_id,
            max_batch_size
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<ItemReport>();
        let mut sub_batches = JoinSet::new();

        for chunk in candidates.chunks(max_batch_size) {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!("Batch {}: deadline passed, not issuing further sub-batches", batch_id);
                break;
            }

            let engine = self.clone();
            let subject = Arc::clone(&subject);
            let chunk = chunk.to_vec();
            let tx = tx.clone();
            let use_cache = request.use_cache;

            sub_batches.spawn(async move {
                engine
                    .run_sub_batch(subject, chunk, use_cache, per_item_timeout, tx)
                    .await
            });
        }
        drop(tx);

        let mut reports = Vec::with_capacity(candidates.len());
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!(
                            "Batch {}: deadline expired with {}/{} results",
                            batch_id,
                            reports.len(),
                            candidates.len()
                        );
                        break;
                    }
                },
                None => rx.recv().await,
            };

            match next {
                Some(report) => reports.push(report),
                None => break,
            }
        }
        // Abandon anything still in flight
        sub_batches.abort_all();

        let abandoned = candidates.len() - reports.len();
        let outcome = aggregate(reports, started.elapsed(), abandoned);

        tracing::info!(
            "Batch {}: {} results for {} in {:.1}ms (cache hit rate {:.2}, success rate {:.2}, {} errors)",
            batch_id,
            outcome.results.len(),
            request.subject_id,
            outcome.metrics.total_latency_ms,
            outcome.metrics.cache_hit_rate,
            outcome.metrics.success_rate,
            outcome.metrics.error_count
        );

        Ok(outcome)
    }

    /// Rank the subject's candidate pool by combined score
    ///
    /// Neutral defaults are left out of the ranking; they stand for failures,
    /// not for real compatibility.
    pub async fn rank_candidates(
        &self,
        subject_id: &str,
        options: &RankOptions,
    ) -> Result<RankedCandidates, CompatError> {
        if subject_id.trim().is_empty() {
            return Err(CompatError::Validation("subject ID is empty".to_string()));
        }

        let limit = options.limit.clamp(1, self.settings.max_rank_limit.max(1));
        let filters = PoolFilters {
            limit: limit * self.settings.candidate_buffer_factor.max(1),
            exclude_user_ids: options.exclude_user_ids.clone(),
        };

        let pool = self.pool.candidates(subject_id, &filters).await?;
        let pool_size = pool.len();

        let mut request = BatchRequest::new(subject_id, pool).with_cache(options.use_cache);
        request.deadline = options.deadline;

        let outcome = self.score_batch(&request).await?;

        let mut results: Vec<CompatibilityResult> = outcome
            .results
            .into_iter()
            .filter(|r| !r.degraded && r.combined_score >= options.min_combined_score)
            .collect();
        results.truncate(limit);

        tracing::info!(
            "Ranked {} of {} candidates for {} (limit {})",
            results.len(),
            pool_size,
            subject_id,
            limit
        );

        Ok(RankedCandidates {
            results,
            metrics: outcome.metrics,
            pool_size,
        })
    }

    async fn run_sub_batch(
        self,
        subject: Arc<Profile>,
        chunk: Vec<String>,
        use_cache: bool,
        per_item_timeout: Duration,
        tx: mpsc::UnboundedSender<ItemReport>,
    ) {
        let mut tasks = JoinSet::new();

        for candidate_id in chunk {
            let engine = self.clone();
            let subject = Arc::clone(&subject);
            let tx = tx.clone();

            tasks.spawn(async move {
                let report = engine
                    .run_item(&subject, &candidate_id, use_cache, per_item_timeout)
                    .await;
                // The receiver is gone once the batch deadline has expired
                let _ = tx.send(report);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("Scoring task panicked: {}", e);
                }
            }
        }
    }

    /// One candidate: PENDING -> (cache hit | compute) -> DONE, or the
    /// neutral default on timeout or error
    async fn run_item(
        &self,
        subject: &Profile,
        candidate_id: &str,
        use_cache: bool,
        per_item_timeout: Duration,
    ) -> ItemReport {
        let started = Instant::now();

        let work = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| CompatError::Upstream("scheduler is shut down".to_string()))?;
            self.compute_pair(subject, candidate_id, use_cache).await
        };

        let outcome = match tokio::time::timeout(per_item_timeout, work).await {
            Ok(Ok((result, outcome))) => {
                return ItemReport {
                    result,
                    outcome,
                    latency: started.elapsed(),
                };
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "Scoring {} <-> {} failed, using neutral default: {}",
                    subject.user_id,
                    candidate_id,
                    e
                );
                TaskOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    "Scoring {} <-> {} timed out after {}ms, using neutral default",
                    subject.user_id,
                    candidate_id,
                    per_item_timeout.as_millis()
                );
                TaskOutcome::TimedOut
            }
        };

        ItemReport {
            result: CompatibilityResult::neutral(
                &subject.user_id,
                candidate_id,
                self.cache.clock().now_ms(),
            ),
            outcome,
            latency: started.elapsed(),
        }
    }

    /// Cache-first scoring of one candidate against an already resolved subject
    async fn compute_pair(
        &self,
        subject: &Profile,
        candidate_id: &str,
        use_cache: bool,
    ) -> Result<(CompatibilityResult, TaskOutcome), CompatError> {
        if use_cache {
            if let Some(hit) = self.cache.get_pair(&subject.user_id, candidate_id).await {
                return Ok((hit, TaskOutcome::CacheHit));
            }
        }

        let result = self.compute_fresh(subject, candidate_id, use_cache).await?;
        Ok((result, TaskOutcome::Computed))
    }

    /// Resolve the candidate, score the pair and store the result
    async fn compute_fresh(
        &self,
        subject: &Profile,
        candidate_id: &str,
        use_cache: bool,
    ) -> Result<CompatibilityResult, CompatError> {
        let candidate = self.resolve_profile(candidate_id, use_cache).await?;
        let result = self.evaluate(subject, &candidate).await?;
        self.cache.set_pair(&result).await;
        Ok(result)
    }

    async fn resolve_profile(&self, user_id: &str, use_cache: bool) -> Result<Profile, CompatError> {
        if use_cache {
            if let Some(profile) = self.cache.get_profile(user_id).await {
                return Ok(profile);
            }
        }

        let profile = self.profiles.resolve(user_id).await?;
        self.cache.set_profile(&profile).await;
        Ok(profile)
    }

    async fn evaluate(
        &self,
        subject: &Profile,
        candidate: &Profile,
    ) -> Result<CompatibilityResult, CompatError> {
        let chart_a = normalize_optional(subject.natal_chart.as_ref());
        let chart_b = normalize_optional(candidate.natal_chart.as_ref());
        let synastry = score_synastry(&chart_a, &chart_b);

        let questionnaire = self.questionnaire.score(subject, candidate).await?;
        if !questionnaire.score.is_finite() {
            return Err(CompatError::Upstream(format!(
                "questionnaire score for {} <-> {} is not a number",
                subject.user_id, candidate.user_id
            )));
        }
        let questionnaire_score = questionnaire.score.clamp(0.0, 100.0);

        let combined = self
            .combiner
            .combine(synastry.score as f64, questionnaire_score);

        Ok(CompatibilityResult {
            subject_id: subject.user_id.clone(),
            candidate_id: candidate.user_id.clone(),
            astrological_score: synastry.score,
            astrological_grade: synastry.grade,
            astrological_unscored: synastry.unscored,
            questionnaire_score,
            questionnaire_grade: questionnaire.grade,
            combined_score: combined.combined_score,
            combined_grade: combined.combined_grade,
            meets_threshold: combined.meets_threshold,
            priority_score: combined.priority_score,
            is_recommended: combined.is_recommended,
            computed_at_ms: self.cache.clock().now_ms(),
            from_cache: false,
            degraded: false,
        })
    }
}

/// Trim, drop blanks and the subject itself, dedupe keeping first
/// occurrence, and cap the list
pub fn prepare_candidates(subject_id: &str, candidate_ids: &[String], cap: usize) -> Vec<String> {
    let subject_id = subject_id.trim();
    let mut seen = HashSet::new();

    candidate_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && *id != subject_id)
        .filter(|id| seen.insert(*id))
        .take(cap)
        .map(str::to_string)
        .collect()
}

/// Sort the results and compute batch metrics
pub fn aggregate(reports: Vec<ItemReport>, wall_clock: Duration, abandoned: usize) -> BatchOutcome {
    let processed = reports.len();

    let mut cache_hits = 0;
    let mut timeout_count = 0;
    let mut failed = 0;
    let mut latency_sum = Duration::ZERO;

    for report in &reports {
        latency_sum += report.latency;
        match report.outcome {
            TaskOutcome::CacheHit => cache_hits += 1,
            TaskOutcome::TimedOut => timeout_count += 1,
            TaskOutcome::Failed => failed += 1,
            TaskOutcome::Computed => {}
        }
    }

    let ratio = |count: usize| {
        if processed > 0 {
            count as f64 / processed as f64
        } else {
            0.0
        }
    };
    let error_count = timeout_count + failed;

    let mut results: Vec<CompatibilityResult> = reports.into_iter().map(|r| r.result).collect();
    results.sort_by(rank_order);

    BatchOutcome {
        results,
        metrics: BatchMetrics {
            average_latency_ms: if processed > 0 {
                latency_sum.as_secs_f64() * 1000.0 / processed as f64
            } else {
                0.0
            },
            cache_hit_rate: ratio(cache_hits),
            success_rate: ratio(processed - error_count),
            total_latency_ms: wall_clock.as_secs_f64() * 1000.0,
            processed,
            cache_hits,
            error_count,
            timeout_count,
            abandoned,
        },
    }
}

fn validate_pair(subject_id: &str, candidate_id: &str) -> Result<(), CompatError> {
    if subject_id.trim().is_empty() || candidate_id.trim().is_empty() {
        return Err(CompatError::Validation("user IDs must not be empty".to_string()));
    }
    if subject_id == candidate_id {
        return Err(CompatError::Validation(
            "cannot score a profile against itself".to_string(),
        ));
    }
    Ok(())
}
