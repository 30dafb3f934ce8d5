// Route handlers
//
// Handlers translate HTTP payloads to manager calls and back. Manager results
// already carry `status`, so they are returned as-is.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::Uri,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use toolhost_core::{
    short_id, ActiveSessions, DiscoverResult, ExecuteResult, LaunchSpec, RunnerError,
    SessionStatus, StartResult,
};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverRequest {
    pub session_id: String,
    pub agent_id: String,
    pub mcp_config: LaunchSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub session_id: String,
    pub mcp_config: LaunchSpec,
    pub tool_name: String,
    #[serde(default = "empty_arguments")]
    pub arguments: Value,
}

fn empty_arguments() -> Value {
    json!({})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub session_id: String,
    pub mcp_config: LaunchSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopQuery {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: String,
    pub session_id: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub platform: String,
    pub is_windows: bool,
    pub version: String,
    pub uptime: String,
    pub active_sessions: usize,
}

/// `H:MM:SS`, or `N day(s), H:MM:SS` past the first day
pub fn format_uptime(started_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let total = now.signed_duration_since(started_at).num_seconds().max(0);
    let days = total / 86_400;
    let rest = total % 86_400;
    let clock = format!("{}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {}", clock),
        n => format!("{} days, {}", n, clock),
    }
}

pub async fn discover(
    State(state): State<AppState>,
    payload: Result<Json<DiscoverRequest>, JsonRejection>,
) -> Result<Json<DiscoverResult>, ApiError> {
    let Json(request) = payload?;
    info!(
        target: "gateway",
        server = %request.mcp_config.name,
        session = %short_id(&request.session_id),
        agent = %request.agent_id,
        "Tool discovery request"
    );

    let result = state.manager.discover(&request.mcp_config).await;
    match &result {
        DiscoverResult::Success { tools, .. } => {
            info!(target: "gateway", tool_count = tools.len(), "Tool discovery successful");
        }
        DiscoverResult::Error { error, .. } => {
            warn!(target: "gateway", error = %error, "Tool discovery failed");
        }
    }
    Ok(Json(result))
}

pub async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<ExecuteResult>, ApiError> {
    let Json(request) = payload?;
    info!(
        target: "gateway",
        tool = %request.tool_name,
        session = %short_id(&request.session_id),
        server = %request.mcp_config.name,
        "Tool execution request"
    );

    let result = state
        .manager
        .execute(
            &request.session_id,
            &request.mcp_config,
            &request.tool_name,
            request.arguments,
        )
        .await;

    if let ExecuteResult::Error { error } = &result {
        warn!(target: "gateway", tool = %request.tool_name, error = %error, "Tool execution failed");
    }
    Ok(Json(result))
}

pub async fn start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResult>, ApiError> {
    let Json(request) = payload?;
    info!(
        target: "gateway",
        session = %short_id(&request.session_id),
        server = %request.mcp_config.name,
        "Session start request"
    );

    Ok(Json(
        state
            .manager
            .start_session(&request.session_id, &request.mcp_config)
            .await,
    ))
}

pub async fn stop(
    State(state): State<AppState>,
    query: Result<Query<StopQuery>, QueryRejection>,
) -> Result<Json<StopResponse>, ApiError> {
    let Query(StopQuery { session_id }) = query?;
    info!(target: "gateway", session = %short_id(&session_id), "Server stop request");

    let (status, message) = if state.manager.stop(&session_id).await {
        ("stopped", "Session closed".to_string())
    } else {
        (
            "not_found",
            RunnerError::SessionNotFound(session_id.clone()).to_string(),
        )
    };

    Ok(Json(StopResponse {
        status: status.to_string(),
        session_id,
        message: Some(message),
    }))
}

pub async fn status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<SessionStatus> {
    debug!(target: "gateway", session = %short_id(&session_id), "Session status query");
    Json(state.manager.status(&session_id))
}

pub async fn active_sessions(State(state): State<AppState>) -> Json<ActiveSessions> {
    Json(state.manager.list_active())
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.config.snapshot().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        platform: config.platform,
        is_windows: config.is_windows,
        version: config.version,
        uptime: format_uptime(state.started_at, Utc::now()),
        active_sessions: state.manager.registry().count(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<Value> {
    let now = Utc::now();
    let manager_stats = state.manager.stats().await;
    let mut system = state.config.read().await.summary();
    if let Value::Object(ref mut map) = system {
        map.insert("uptime".into(), json!(format_uptime(state.started_at, now)));
        map.insert("server_start_time".into(), json!(state.started_at));
    }

    Json(json!({
        "system": system,
        "mcp": manager_stats,
        "timestamp": now,
    }))
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_uptime() {
        let start = Utc::now();
        assert_eq!(format_uptime(start, start + Duration::seconds(59)), "0:00:59");
        assert_eq!(
            format_uptime(start, start + Duration::seconds(3 * 3600 + 62)),
            "3:01:02"
        );
        assert_eq!(
            format_uptime(start, start + Duration::days(2) + Duration::minutes(5)),
            "2 days, 0:05:00"
        );
        assert_eq!(format_uptime(start, start - Duration::seconds(5)), "0:00:00");
    }

    #[test]
    fn test_execute_request_defaults_arguments() {
        let request: ExecuteRequest = serde_json::from_value(json!({
            "session_id": "s",
            "mcp_config": {"name": "fs", "command": "npx"},
            "tool_name": "read"
        }))
        .unwrap();

        assert_eq!(request.arguments, json!({}));
        assert!(request.mcp_config.args.is_empty());
    }
}
