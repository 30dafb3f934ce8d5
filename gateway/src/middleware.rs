// Request middleware
//
// Outermost to innermost: request logging, security headers, rate limiting,
// API key check. Each reads live configuration from `AppState`.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use toolhost_core::resolve_client_id;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::AppState;

/// Paths served without an API key
pub const PUBLIC_PATHS: &[&str] = &["/", "/health"];

const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key"];

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn new_request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

pub async fn request_logging(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let request_id = new_request_id();
    let start = Instant::now();

    info!(
        target: "gateway",
        request_id = %request_id,
        method = %req.method(),
        uri = %req.uri(),
        "Request"
    );

    if state.config.read().await.debug {
        let headers: Vec<(String, String)> = req
            .headers()
            .iter()
            .map(|(name, value)| {
                let shown = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                    "[REDACTED]".to_string()
                } else {
                    value.to_str().unwrap_or("<binary>").to_string()
                };
                (name.to_string(), shown)
            })
            .collect();
        debug!(target: "gateway", request_id = %request_id, headers = ?headers, "Request headers");
    }

    let mut response = next.run(req).await;
    let elapsed = format!("{:.3}", start.elapsed().as_secs_f64());

    info!(
        target: "gateway",
        request_id = %request_id,
        status = response.status().as_u16(),
        elapsed_secs = %elapsed,
        "Response"
    );

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert("x-request-id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&elapsed) {
        headers.insert("x-process-time", value);
    }
    response
}

pub async fn security_headers(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let production = state.config.read().await.is_production();
    let mut response = next.run(req).await;

    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-xss-protection", HeaderValue::from_static("1; mode=block"));
    if production {
        headers.insert(
            "strict-transport-security",
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        );
    }
    response
}

pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client = resolve_client_id(
        header_str(req.headers(), "x-forwarded-for"),
        header_str(req.headers(), "x-real-ip"),
        peer,
    );

    match state.limiter.admit(&client).await.into_result() {
        Ok(_) => next.run(req).await,
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let configured = state.config.read().await.api_key.clone();
    let Some(expected) = configured else {
        return next.run(req).await;
    };
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            Query::<ApiKeyQuery>::try_from_uri(req.uri())
                .ok()
                .and_then(|Query(q)| q.api_key)
        });

    if provided.as_deref() == Some(expected.as_str()) {
        next.run(req).await
    } else {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        warn!(target: "gateway", client = %peer, path = %req.uri().path(), "Invalid API key");
        ApiError::Unauthorized.into_response()
    }
}
