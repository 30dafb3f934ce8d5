// Toolhost Gateway
// HTTP surface over the session manager

pub mod error;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use toolhost_core::{RateLimiter, RunnerConfig, SessionManager, SharedConfig, SystemClock};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::{
        predicate::{DefaultPredicate, Predicate, SizeAbove},
        CompressionLayer,
    },
    cors::{AllowHeaders, AllowMethods, Any, CorsLayer},
};
use tracing::{error, info, warn};

pub use error::{ApiError, ErrorResponse};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub limiter: Arc<RateLimiter>,
    pub config: SharedConfig,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let config = manager.config().clone();
        Self {
            limiter: Arc::new(RateLimiter::new(config.clone(), Arc::new(SystemClock))),
            manager,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }
}

/// Build the full application: routes plus the middleware stack.
///
/// CORS origins are fixed at build time; everything else reads the live
/// configuration per request.
pub fn router(state: AppState, config: &RunnerConfig) -> Router {
    let api = Router::new()
        .route("/", get(routes::health))
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats))
        .route("/mcp/discover", post(routes::discover))
        .route("/mcp/execute", post(routes::execute))
        .route("/mcp/start", post(routes::start))
        .route("/mcp/stop", post(routes::stop))
        .route("/mcp/status/:session_id", get(routes::status))
        .route("/mcp/active-sessions", get(routes::active_sessions))
        .fallback(routes::not_found);

    // layers added later wrap the ones added earlier
    api.layer(from_fn_with_state(state.clone(), middleware::require_api_key))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::security_headers))
        .layer(from_fn_with_state(state.clone(), middleware::request_logging))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(
            CompressionLayer::new()
                .compress_when(DefaultPredicate::new().and(SizeAbove::new(1000))),
        )
        .layer(cors_layer(config))
        .with_state(state)
}

/// Bind the configured host and port. The host may be a name such as
/// `localhost` or a bare IPv6 address.
pub async fn bind_listener(config: &RunnerConfig) -> std::io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await
}

fn cors_layer(config: &RunnerConfig) -> CorsLayer {
    let origins = config.cors_origins_list();
    if origins.iter().any(|o| o == "*") {
        info!(target: "gateway", "CORS allows any origin");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(target: "gateway", origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    info!(target: "gateway", origins = ?origins, "CORS setup complete");

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(target: "gateway", panic = %detail, "Request handler panicked");
    ApiError::Internal.into_response()
}
