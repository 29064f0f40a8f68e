// Core algorithm exports
pub mod chart;
pub mod combiner;
pub mod engine;
pub mod error;
pub mod synastry;

pub use chart::{normalize_chart, normalize_optional};
pub use combiner::{rank_order, CombinedScore, CombinerConfig, CompatibilityCombiner};
pub use engine::{BatchMetrics, BatchOutcome, BatchRequest, CompatibilityEngine, EngineSettings, RankOptions, RankedCandidates, TaskOutcome};
pub use error::CompatError;
pub use synastry::{score_synastry, AspectMatch, AspectType, SynastryReport};
