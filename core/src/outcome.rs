// Results returned by the session manager
//
// Each enum serializes with a `status` tag so the HTTP layer can return it
// as-is: `{"status": "success", ...}` / `{"status": "error", "error": ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::protocol::{CapabilityDescriptor, ServerIdentity};
use crate::registry::SessionSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscoverResult {
    Success {
        tools: Vec<CapabilityDescriptor>,
        server_info: ServerIdentity,
    },
    Error {
        error: String,
        #[serde(default)]
        tools: Vec<CapabilityDescriptor>,
    },
}

impl DiscoverResult {
    pub fn error(error: impl Into<String>) -> Self {
        DiscoverResult::Error {
            error: error.into(),
            tools: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DiscoverResult::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteResult {
    Success { result: Value },
    Error { error: String },
}

impl ExecuteResult {
    /// Wrap a provider's raw tools/call result
    pub fn from_raw(raw: Value) -> Self {
        ExecuteResult::Success {
            result: format_tool_result(raw),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        ExecuteResult::Error {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecuteResult::Success { .. })
    }
}

/// Normalize a tools/call result.
///
/// Content items carrying `text` collapse to `{type: "text", text}`; other
/// items and a non-list `content` pass through. A result without `content`
/// is reported as its string form.
pub fn format_tool_result(raw: Value) -> Value {
    match raw {
        Value::Object(mut map) if map.contains_key("content") => {
            match map.remove("content").unwrap_or(Value::Null) {
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| match item.get("text") {
                            Some(text) => json!({"type": "text", "text": text}),
                            None => item,
                        })
                        .collect(),
                ),
                other => other,
            }
        }
        Value::String(s) => Value::String(s),
        other => Value::String(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Running {
        name: String,
        created_at: DateTime<Utc>,
        last_used: DateTime<Utc>,
    },
    NotFound,
}

impl From<Option<SessionSnapshot>> for SessionStatus {
    fn from(snapshot: Option<SessionSnapshot>) -> Self {
        match snapshot {
            Some(s) => SessionStatus::Running {
                name: s.name,
                created_at: s.created_at,
                last_used: s.last_used,
            },
            None => SessionStatus::NotFound,
        }
    }
}

/// Outcome of an explicit session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartResult {
    /// A new provider was launched and registered
    Started {
        session_id: String,
        server_info: ServerIdentity,
    },
    /// The id already names a live session; nothing was launched
    Running { session_id: String, name: String },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSessions {
    pub sessions: Vec<SessionSnapshot>,
    pub total_count: usize,
}

impl From<Vec<SessionSnapshot>> for ActiveSessions {
    fn from(sessions: Vec<SessionSnapshot>) -> Self {
        Self {
            total_count: sessions.len(),
            sessions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub active_sessions: usize,
    pub cached_tools: usize,
    pub cache_enabled: bool,
    pub auto_cleanup_enabled: bool,
    pub platform: String,
    pub is_windows: bool,
}
