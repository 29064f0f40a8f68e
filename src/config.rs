use crate::core::{CombinerConfig, EngineSettings};
use crate::services::PairCacheConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub appwrite: AppwriteSettings,
    #[serde(default)]
    pub collection: CollectionSettings,
    #[serde(default)]
    pub questionnaire: QuestionnaireSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub compatibility: CompatibilitySettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }

#[derive(Debug, Clone, Deserialize)]
pub struct AppwriteSettings {
    #[serde(default = "default_appwrite_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AppwriteSettings {
    fn default() -> Self {
        Self {
            endpoint: default_appwrite_endpoint(),
            api_key: String::new(),
            project_id: String::new(),
            database_id: String::new(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_appwrite_endpoint() -> String { "http://localhost/v1".to_string() }
fn default_request_timeout_ms() -> u64 { 2000 }

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSettings {
    #[serde(default = "default_profiles_collection")]
    pub profiles: String,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            profiles: default_profiles_collection(),
        }
    }
}

fn default_profiles_collection() -> String { "profiles".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionnaireSettings {
    #[serde(default = "default_questionnaire_endpoint")]
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for QuestionnaireSettings {
    fn default() -> Self {
        Self {
            endpoint: default_questionnaire_endpoint(),
            api_key: None,
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_questionnaire_endpoint() -> String {
    "http://localhost:8081/api/v1/questionnaire/score".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Optional L2 tier; the process-local cache is always on
    pub redis_url: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub profile_ttl_secs: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub pair_ttl_secs: u64,
    #[serde(default = "default_l1_cache_size")]
    pub l1_cache_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            profile_ttl_secs: default_cache_ttl_secs(),
            pair_ttl_secs: default_cache_ttl_secs(),
            l1_cache_size: default_l1_cache_size(),
        }
    }
}

impl CacheSettings {
    pub fn pair_cache_config(&self) -> PairCacheConfig {
        PairCacheConfig {
            profile_ttl: Duration::from_secs(self.profile_ttl_secs),
            pair_ttl: Duration::from_secs(self.pair_ttl_secs),
            local_capacity: self.l1_cache_size.max(1),
        }
    }
}

fn default_cache_ttl_secs() -> u64 { 15 * 60 }
fn default_l1_cache_size() -> usize { 10_000 }

#[derive(Debug, Clone, Deserialize)]
pub struct CompatibilitySettings {
    #[serde(default = "default_half_weight")]
    pub astrological_weight: f64,
    #[serde(default = "default_half_weight")]
    pub questionnaire_weight: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_recommendation_priority")]
    pub recommendation_priority: f64,
}

impl Default for CompatibilitySettings {
    fn default() -> Self {
        Self {
            astrological_weight: default_half_weight(),
            questionnaire_weight: default_half_weight(),
            threshold: default_threshold(),
            recommendation_priority: default_recommendation_priority(),
        }
    }
}

impl CompatibilitySettings {
    pub fn combiner_config(&self) -> CombinerConfig {
        CombinerConfig {
            astrological_weight: self.astrological_weight,
            questionnaire_weight: self.questionnaire_weight,
            threshold: self.threshold,
            recommendation_priority: self.recommendation_priority,
        }
    }
}

fn default_half_weight() -> f64 { 0.5 }
fn default_threshold() -> f64 { 60.0 }
fn default_recommendation_priority() -> f64 { 0.75 }

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_per_item_timeout_ms")]
    pub per_item_timeout_ms: u64,
    #[serde(default = "default_candidate_buffer_factor")]
    pub candidate_buffer_factor: usize,
    #[serde(default = "default_concurrency_multiplier")]
    pub concurrency_multiplier: usize,
    #[serde(default = "default_max_rank_limit")]
    pub max_rank_limit: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            per_item_timeout_ms: default_per_item_timeout_ms(),
            candidate_buffer_factor: default_candidate_buffer_factor(),
            concurrency_multiplier: default_concurrency_multiplier(),
            max_rank_limit: default_max_rank_limit(),
        }
    }
}

impl BatchSettings {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_batch_size: self.max_batch_size.max(1),
            per_item_timeout: Duration::from_millis(self.per_item_timeout_ms),
            candidate_buffer_factor: self.candidate_buffer_factor.max(1),
            concurrency_multiplier: self.concurrency_multiplier.max(1),
            max_rank_limit: self.max_rank_limit.max(1),
        }
    }
}

fn default_max_batch_size() -> usize { 50 }
fn default_per_item_timeout_ms() -> u64 { 300 }
fn default_candidate_buffer_factor() -> usize { 4 }
fn default_concurrency_multiplier() -> usize { 8 }
fn default_max_rank_limit() -> usize { 100 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with LUME__)
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., LUME__BATCH__MAX_BATCH_SIZE -> batch.max_batch_size
            .add_source(env_source())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()?
            .try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("LUME")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
