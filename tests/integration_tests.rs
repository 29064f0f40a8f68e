// Integration tests for Lume Synastry

use async_trait::async_trait;
use lume_synastry::core::{
    BatchRequest, CombinerConfig, CompatError, CompatibilityCombiner, CompatibilityEngine, EngineSettings, RankOptions,
};
use lume_synastry::models::{Profile, QuestionnaireScore, RawChart};
use lume_synastry::services::{
    CandidatePoolResolver, ManualClock, PairCache, PairCacheConfig, PoolFilters, ProfileResolver, QuestionnaireScorer,
    ResolveError,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// In-memory profile store with configurable failures and latency
#[derive(Default)]
struct FakeDirectory {
    profiles: HashMap<String, Profile>,
    failing: HashSet<String>,
    slow: HashMap<String, Duration>,
    pool: Vec<String>,
    resolve_calls: AtomicUsize,
}

impl FakeDirectory {
    fn with_profiles(ids: &[&str]) -> Self {
        let mut directory = Self::default();
        for id in ids {
            directory.profiles.insert(id.to_string(), create_test_profile(id, 0.0));
        }
        directory
    }
}

#[async_trait]
impl ProfileResolver for FakeDirectory {
    async fn resolve(&self, user_id: &str) -> Result<Profile, ResolveError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.slow.get(user_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(user_id) {
            return Err(ResolveError::Upstream(format!("store unavailable for {}", user_id)));
        }

        self.profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(user_id.to_string()))
    }
}

#[async_trait]
impl CandidatePoolResolver for FakeDirectory {
    async fn candidates(&self, subject_id: &str, filters: &PoolFilters) -> Result<Vec<String>, ResolveError> {
        Ok(self
            .pool
            .iter()
            .filter(|id| id.as_str() != subject_id && !filters.exclude_user_ids.contains(id))
            .take(filters.limit)
            .cloned()
            .collect())
    }
}

/// Questionnaire scorer returning a fixed score per candidate
struct FixedQuestionnaire {
    scores: HashMap<String, f64>,
    default_score: f64,
}

impl FixedQuestionnaire {
    fn uniform(score: f64) -> Self {
        Self {
            scores: HashMap::new(),
            default_score: score,
        }
    }
}

#[async_trait]
impl QuestionnaireScorer for FixedQuestionnaire {
    async fn score(&self, _a: &Profile, b: &Profile) -> Result<QuestionnaireScore, ResolveError> {
        let score = self.scores.get(&b.user_id).copied().unwrap_or(self.default_score);
        Ok(QuestionnaireScore {
            score,
            grade: "B".to_string(),
        })
    }
}

fn create_test_profile(id: &str, sun: f64) -> Profile {
    let mut profile = Profile::new(id);
    let chart: RawChart = serde_json::from_value(json!({ "sun": sun, "moon": (sun + 120.0) % 360.0 })).unwrap();
    profile.natal_chart = Some(chart);
    profile
}

fn create_engine(
    directory: Arc<FakeDirectory>,
    questionnaire: FixedQuestionnaire,
    settings: EngineSettings,
) -> CompatibilityEngine {
    let cache = PairCache::new(PairCacheConfig::default(), Arc::new(ManualClock::new(1_000)), None);

    CompatibilityEngine::new(
        directory.clone(),
        Arc::new(questionnaire),
        directory,
        Arc::new(cache),
        CompatibilityCombiner::new(CombinerConfig::default()).unwrap(),
        settings,
    )
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_score_one_reverse_direction_is_cached() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["alice", "bob"]));
    let engine = create_engine(directory.clone(), FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let first = assert_ok!(engine.score_one("alice", "bob", true).await);
    assert!(!first.from_cache);
    assert_eq!(first.subject_id, "alice");

    let calls_after_first = directory.resolve_calls.load(Ordering::SeqCst);

    let second = assert_ok!(engine.score_one("bob", "alice", true).await);
    assert!(second.from_cache);
    assert_eq!(second.subject_id, "bob");
    assert_eq!(second.candidate_id, "alice");
    assert_eq!(second.combined_score, first.combined_score);
    assert_eq!(second.astrological_score, first.astrological_score);

    // Served without touching the store
    assert_eq!(directory.resolve_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn test_score_one_bypassing_cache_recomputes() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["alice", "bob"]));
    let engine = create_engine(directory, FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    assert_ok!(engine.score_one("alice", "bob", true).await);
    let fresh = assert_ok!(engine.score_one("alice", "bob", false).await);
    assert!(!fresh.from_cache);
}

#[tokio::test]
async fn test_score_one_unknown_subject() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["bob"]));
    let engine = create_engine(directory, FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let err = assert_err!(engine.score_one("ghost", "bob", true).await);
    assert!(matches!(err, CompatError::NotFound(ref id) if id == "ghost"));
}

#[tokio::test]
async fn test_score_one_rejects_self_pair() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["alice"]));
    let engine = create_engine(directory, FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let err = assert_err!(engine.score_one("alice", "alice", true).await);
    assert!(matches!(err, CompatError::Validation(_)));
}

#[tokio::test]
async fn test_score_one_times_out() {
    let mut directory = FakeDirectory::with_profiles(&["alice", "bob"]);
    directory.slow.insert("bob".to_string(), Duration::from_secs(5));

    let settings = EngineSettings {
        per_item_timeout: Duration::from_millis(50),
        ..EngineSettings::default()
    };
    let engine = create_engine(Arc::new(directory), FixedQuestionnaire::uniform(70.0), settings);

    let err = assert_err!(engine.score_one("alice", "bob", true).await);
    assert!(matches!(err, CompatError::Timeout(50)));
}

#[tokio::test]
async fn test_batch_absorbs_single_failure() {
    let candidates: Vec<String> = (0..10).map(|i| format!("c{}", i)).collect();
    let mut all: Vec<&str> = candidates.iter().map(String::as_str).collect();
    all.push("subject");

    let mut directory = FakeDirectory::with_profiles(&all);
    directory.failing.insert("c3".to_string());
    let engine = create_engine(Arc::new(directory), FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let outcome = assert_ok!(engine.score_batch(&BatchRequest::new("subject", candidates)).await);

    assert_eq!(outcome.results.len(), 10);
    assert_eq!(outcome.metrics.processed, 10);
    assert_eq!(outcome.metrics.error_count, 1);
    assert_eq!(outcome.metrics.timeout_count, 0);
    assert!((outcome.metrics.success_rate - 0.9).abs() < 1e-9);

    let failed = outcome.results.iter().find(|r| r.candidate_id == "c3").unwrap();
    assert!(failed.degraded);
    assert_eq!(failed.combined_score, 50.0);
    assert_eq!(failed.priority_score, 0.5);
    assert!(!failed.is_recommended);
}

#[tokio::test]
async fn test_batch_slow_candidate_times_out_alone() {
    let candidates: Vec<String> = (0..50).map(|i| format!("c{}", i)).collect();
    let mut all: Vec<&str> = candidates.iter().map(String::as_str).collect();
    all.push("subject");

    let mut directory = FakeDirectory::with_profiles(&all);
    directory.slow.insert("c17".to_string(), Duration::from_secs(5));
    let engine = create_engine(Arc::new(directory), FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let request = BatchRequest::new("subject", candidates).with_per_item_timeout(Duration::from_millis(150));
    let outcome = assert_ok!(engine.score_batch(&request).await);

    assert_eq!(outcome.results.len(), 50);
    assert_eq!(outcome.metrics.timeout_count, 1);
    assert_eq!(outcome.metrics.error_count, 1);
    assert_eq!(outcome.results.iter().filter(|r| !r.degraded).count(), 49);

    // The slow candidate costs one timeout, not its full resolve time
    assert!(
        outcome.metrics.total_latency_ms < 300.0,
        "batch took {}ms",
        outcome.metrics.total_latency_ms
    );

    let slow = outcome.results.iter().find(|r| r.candidate_id == "c17").unwrap();
    assert!(slow.degraded);
    assert_eq!(slow.combined_score, 50.0);
}

#[tokio::test]
async fn test_batch_caps_candidates_to_buffer() {
    let candidates: Vec<String> = (0..30).map(|i| format!("c{}", i)).collect();
    let mut all: Vec<&str> = candidates.iter().map(String::as_str).collect();
    all.push("subject");

    let directory = Arc::new(FakeDirectory::with_profiles(&all));
    let engine = create_engine(directory, FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    // Five per sub-batch with the default buffer factor of four
    let request = BatchRequest::new("subject", candidates.clone()).with_max_batch_size(5);
    let outcome = assert_ok!(engine.score_batch(&request).await);

    assert_eq!(outcome.results.len(), 20);
    assert_eq!(outcome.metrics.processed, 20);
    assert_eq!(outcome.metrics.abandoned, 0);

    // The first twenty in input order are the ones considered
    let scored: HashSet<_> = outcome.results.iter().map(|r| r.candidate_id.clone()).collect();
    let expected: HashSet<_> = candidates[..20].iter().cloned().collect();
    assert_eq!(scored, expected);
}

#[tokio::test]
async fn test_batch_empty_and_duplicate_input() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["subject", "b", "c"]));
    let engine = create_engine(directory.clone(), FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let empty = assert_ok!(engine.score_batch(&BatchRequest::new("subject", Vec::new())).await);
    assert!(empty.results.is_empty());
    assert_eq!(empty.metrics.processed, 0);
    assert_eq!(empty.metrics.success_rate, 0.0);

    let only_self = assert_ok!(engine.score_batch(&BatchRequest::new("subject", ids(&["subject", ""]))).await);
    assert!(only_self.results.is_empty());
    assert_eq!(directory.resolve_calls.load(Ordering::SeqCst), 0);

    let deduped = assert_ok!(
        engine
            .score_batch(&BatchRequest::new("subject", ids(&["b", "c", "b", "subject"])))
            .await
    );
    let mut seen: Vec<_> = deduped.results.iter().map(|r| r.candidate_id.clone()).collect();
    seen.sort();
    assert_eq!(seen, ids(&["b", "c"]));
}

#[tokio::test]
async fn test_batch_unknown_subject_fails() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["b"]));
    let engine = create_engine(directory, FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let err = assert_err!(engine.score_batch(&BatchRequest::new("ghost", ids(&["b"]))).await);
    assert!(matches!(err, CompatError::NotFound(_)));
}

#[tokio::test]
async fn test_batch_second_run_hits_cache() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["subject", "b", "c", "d"]));
    let engine = create_engine(directory, FixedQuestionnaire::uniform(70.0), EngineSettings::default());
    let request = BatchRequest::new("subject", ids(&["b", "c", "d"]));

    let first = assert_ok!(engine.score_batch(&request).await);
    assert_eq!(first.metrics.cache_hits, 0);

    let second = assert_ok!(engine.score_batch(&request).await);
    assert_eq!(second.metrics.cache_hits, 3);
    assert_eq!(second.metrics.cache_hit_rate, 1.0);
    assert!(second.results.iter().all(|r| r.from_cache));

    let without_cache = assert_ok!(engine.score_batch(&request.clone().with_cache(false)).await);
    assert_eq!(without_cache.metrics.cache_hits, 0);
}

#[tokio::test]
async fn test_batch_results_sorted_by_combined_score() {
    let directory = Arc::new(FakeDirectory::with_profiles(&["subject", "low", "mid", "high"]));
    let questionnaire = FixedQuestionnaire {
        scores: HashMap::from([
            ("low".to_string(), 10.0),
            ("mid".to_string(), 55.0),
            ("high".to_string(), 95.0),
        ]),
        default_score: 50.0,
    };
    let engine = create_engine(directory, questionnaire, EngineSettings::default());

    let outcome = assert_ok!(
        engine
            .score_batch(&BatchRequest::new("subject", ids(&["mid", "low", "high"])).with_max_batch_size(1))
            .await
    );

    let order: Vec<_> = outcome.results.iter().map(|r| r.candidate_id.as_str()).collect();
    assert_eq!(order, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn test_batch_deadline_abandons_stragglers() {
    let mut directory = FakeDirectory::with_profiles(&["subject", "a", "b", "c", "slow1", "slow2"]);
    directory.slow.insert("slow1".to_string(), Duration::from_secs(3));
    directory.slow.insert("slow2".to_string(), Duration::from_secs(3));
    let engine = create_engine(Arc::new(directory), FixedQuestionnaire::uniform(70.0), EngineSettings::default());

    let request = BatchRequest::new("subject", ids(&["a", "slow1", "b", "slow2", "c"]))
        .with_per_item_timeout(Duration::from_secs(10))
        .with_deadline(Duration::from_millis(200));
    let outcome = assert_ok!(engine.score_batch(&request).await);

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.metrics.abandoned, 2);
    assert!(outcome.results.iter().all(|r| !r.candidate_id.starts_with("slow")));
}

#[tokio::test]
async fn test_rank_candidates_filters_and_truncates() {
    let mut directory =
        FakeDirectory::with_profiles(&["subject", "top", "good", "ok", "poor", "broken", "excluded"]);
    directory.failing.insert("broken".to_string());
    directory.pool = ids(&["top", "good", "ok", "poor", "broken", "excluded"]);

    let questionnaire = FixedQuestionnaire {
        scores: HashMap::from([
            ("top".to_string(), 100.0),
            ("good".to_string(), 90.0),
            ("ok".to_string(), 80.0),
            ("poor".to_string(), 0.0),
        ]),
        default_score: 50.0,
    };
    let engine = create_engine(Arc::new(directory), questionnaire, EngineSettings::default());

    let options = RankOptions {
        limit: 2,
        min_combined_score: 40.0,
        exclude_user_ids: ids(&["excluded"]),
        ..RankOptions::default()
    };
    let ranked = assert_ok!(engine.rank_candidates("subject", &options).await);

    assert_eq!(ranked.pool_size, 5);
    let order: Vec<_> = ranked.results.iter().map(|r| r.candidate_id.as_str()).collect();
    assert_eq!(order, vec!["top", "good"]);
    assert_eq!(ranked.metrics.error_count, 1);

    let everyone = RankOptions {
        limit: 10,
        ..RankOptions::default()
    };
    let ranked = assert_ok!(engine.rank_candidates("subject", &everyone).await);
    // The failed candidate never appears in a ranking
    assert!(ranked.results.iter().all(|r| r.candidate_id != "broken"));
    assert_eq!(ranked.results.len(), 4);
}
