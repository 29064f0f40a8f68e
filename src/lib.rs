//! Lume Synastry - pairwise compatibility scoring for the Lume dating app
//!
//! Blends an astrological synastry score computed from two natal charts with
//! an externally computed questionnaire score, caches results per unordered
//! pair and scores candidate batches concurrently with per-item timeouts.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{
    normalize_chart, score_synastry, BatchOutcome, BatchRequest, CompatError, CompatibilityCombiner,
    CompatibilityEngine, RankOptions,
};
pub use models::{CompatibilityResult, Grade, NatalChart, Profile, RawChart};
pub use services::{PairCache, PairCacheConfig};
