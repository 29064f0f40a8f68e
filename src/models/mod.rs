// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{Body, CompatibilityResult, Grade, NatalChart, Placement, Profile, QuestionnaireScore, RawChart, ZodiacSign};
pub use requests::{BatchScoreRequest, RankRequest, ScoreRequest};
pub use responses::{BatchScoreResponse, ErrorResponse, HealthResponse, RankResponse};
