/// Provider protocol seam
///
/// The manager talks to providers only through `ProviderConnector` and
/// `ProviderSession`. `StdioConnector` is the shipped implementation: a
/// newline-delimited JSON-RPC 2.0 client over a child process's stdio.
///
/// Architecture:
/// - `client`: stdio transport, request/response correlation
/// - `types`: JSON-RPC wire shapes and the domain descriptors built from them
pub mod client;
pub mod types;

pub use client::{StdioClient, StdioConnector};
pub use types::{
    CapabilityDescriptor, ServerIdentity, DEFAULT_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};

use crate::launch::ResolvedLaunch;
use async_trait::async_trait;

/// A live connection to one provider process.
///
/// Methods take `&self`; implementations correlate concurrent requests
/// internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Perform the initialize handshake
    async fn initialize(&self) -> Result<ServerIdentity, ProtocolError>;

    /// List every tool the provider exposes
    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, ProtocolError>;

    /// Call one tool and return the provider's raw result document
    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ProtocolError>;

    /// Terminate the connection and the process behind it
    async fn close(&self) -> Result<(), ProtocolError>;
}

/// Opens provider sessions from resolved launch specs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn open(&self, launch: &ResolvedLaunch) -> Result<Box<dyn ProviderSession>, ProtocolError>;
}

/// Protocol-level failures
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{message} (code: {code})")]
    Server { code: i32, message: String },

    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Convert to error code string
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Spawn(_) => "SPAWN_ERROR",
            ProtocolError::Transport(_) => "TRANSPORT_ERROR",
            ProtocolError::Protocol(_) => "PROTOCOL_ERROR",
            ProtocolError::Server { .. } => "SERVER_ERROR",
            ProtocolError::Closed => "CONNECTION_CLOSED",
            ProtocolError::Io(_) => "IO_ERROR",
            ProtocolError::Json(_) => "JSON_ERROR",
        }
    }
}
