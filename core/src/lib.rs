// Toolhost Core Library
// Session and capability-cache manager for stdio tool providers

pub mod adapter;
pub mod cache;
pub mod clock;
pub mod config;
pub mod launch;
pub mod locks;
pub mod manager;
pub mod outcome;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod sweeper;
pub mod telemetry;

// Export core types
pub use adapter::{CallTimeouts, SessionAdapter};
pub use cache::{CacheEntry, CapabilityCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LogFormat, RunnerConfig, SharedConfig};
pub use launch::{CanonicalKey, LaunchSpec, ResolvedLaunch};
pub use manager::SessionManager;
pub use outcome::{
    ActiveSessions, DiscoverResult, ExecuteResult, ManagerStats, SessionStatus, StartResult,
};
pub use protocol::{
    CapabilityDescriptor, ProtocolError, ProviderConnector, ProviderSession, ServerIdentity,
    StdioConnector,
};
pub use locks::KeyedLocks;
pub use rate_limit::{resolve_client_id, Admission, RateLimiter, RETRY_AFTER_SECS};
pub use registry::{SessionRegistry, SessionSnapshot};
pub use sweeper::ExpirySweeper;
pub use telemetry::init_tracing;

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("{reason}")]
    LaunchFailed { name: String, reason: String },

    #[error("{reason}")]
    InvocationFailed { tool: String, reason: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Teardown of '{name}' failed: {reason}")]
    Teardown { name: String, reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunnerError {
    /// Convert to error code string
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::LaunchFailed { .. } => "LAUNCH_FAILED",
            RunnerError::InvocationFailed { .. } => "INVOCATION_FAILED",
            RunnerError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            RunnerError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            RunnerError::Teardown { .. } => "TEARDOWN_FAILED",
            RunnerError::Timeout { .. } => "TIMEOUT",
            RunnerError::Config(_) => "CONFIG_ERROR",
            RunnerError::Io(_) => "IO_ERROR",
            RunnerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// First eight characters of a session id, for log lines.
pub fn short_id(session_id: &str) -> &str {
    match session_id.char_indices().nth(8) {
        Some((idx, _)) => &session_id[..idx],
        None => session_id,
    }
}
