// Service exports
pub mod appwrite;
pub mod cache;
pub mod clock;
pub mod collaborators;
pub mod questionnaire;
pub mod redis_backend;

pub use appwrite::{AppwriteClient, AppwriteError};
pub use cache::{CacheBackend, CacheEntry, CacheError, CacheKey, CacheStats, MemoryBackend, PairCache, PairCacheConfig, PairCacheStats, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{CandidatePoolResolver, PoolFilters, ProfileResolver, QuestionnaireScorer, ResolveError};
pub use questionnaire::HttpQuestionnaireScorer;
pub use redis_backend::RedisBackend;
