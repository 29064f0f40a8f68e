use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use lume_synastry::config::Settings;
use lume_synastry::core::{CompatibilityCombiner, CompatibilityEngine};
use lume_synastry::routes::{self, compatibility::AppState};
use lume_synastry::services::{AppwriteClient, CacheBackend, HttpQuestionnaireScorer, PairCache, RedisBackend, SystemClock};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_logging() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    match log_format.as_str() {
        "pretty" => subscriber.pretty().init(),
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }
}

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    tracing::error!("{}: {}", context, err);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    init_logging();

    info!("Starting Lume synastry compatibility service...");

    let settings = Settings::load().map_err(|e| startup_error("Failed to load configuration", e))?;

    info!("Configuration loaded successfully");

    let appwrite = Arc::new(
        AppwriteClient::new(
            settings.appwrite.endpoint.clone(),
            settings.appwrite.api_key.clone(),
            settings.appwrite.project_id.clone(),
            settings.appwrite.database_id.clone(),
            settings.collection.profiles.clone(),
            Duration::from_millis(settings.appwrite.timeout_ms),
        )
        .map_err(|e| startup_error("Failed to build Appwrite client", e))?,
    );

    info!("Appwrite client initialized");

    let questionnaire = Arc::new(
        HttpQuestionnaireScorer::new(
            settings.questionnaire.endpoint.clone(),
            settings.questionnaire.api_key.clone(),
            Duration::from_millis(settings.questionnaire.timeout_ms),
        )
        .map_err(|e| startup_error("Failed to build questionnaire client", e))?,
    );

    // Redis is an optional second tier; the service runs on the local cache without it
    let remote: Option<Arc<dyn CacheBackend>> = match &settings.cache.redis_url {
        Some(url) => match RedisBackend::connect(url).await {
            Ok(backend) => {
                info!("Redis cache tier connected");
                Some(Arc::new(backend) as Arc<dyn CacheBackend>)
            }
            Err(e) => {
                warn!("Failed to connect to Redis ({}), running with local cache only", e);
                None
            }
        },
        None => None,
    };

    let cache_config = settings.cache.pair_cache_config();
    let cache = Arc::new(PairCache::new(cache_config, Arc::new(SystemClock), remote));

    info!(
        "Pair cache initialized (L1: {} entries, pair TTL: {}s)",
        cache_config.local_capacity,
        cache_config.pair_ttl.as_secs()
    );

    let combiner = CompatibilityCombiner::new(settings.compatibility.combiner_config())
        .map_err(|e| startup_error("Invalid compatibility weights", e))?;

    info!("Combiner initialized with {:?}", combiner.config());

    let engine = CompatibilityEngine::new(
        appwrite.clone(),
        questionnaire,
        appwrite,
        cache,
        combiner,
        settings.batch.engine_settings(),
    );

    let app_state = AppState { engine };

    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
