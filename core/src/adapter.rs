/// Session adapter
///
/// Owns one handshake-completed provider session. Every protocol call is
/// bounded by a timeout and its failure translated into a `RunnerError`.
use crate::config::RunnerConfig;
use crate::launch::ResolvedLaunch;
use crate::protocol::{
    CapabilityDescriptor, ProtocolError, ProviderConnector, ProviderSession, ServerIdentity,
};
use crate::{Result, RunnerError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on a best-effort close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call bounds applied to provider round-trips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    /// Process launch plus initialize
    pub handshake: Duration,
    /// One tools/list or tools/call
    pub call: Duration,
}

impl CallTimeouts {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            handshake: Duration::from_millis(config.handshake_timeout_ms),
            call: Duration::from_millis(config.call_timeout_ms),
        }
    }
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

pub struct SessionAdapter {
    name: String,
    server: ServerIdentity,
    session: Box<dyn ProviderSession>,
    timeouts: CallTimeouts,
}

impl std::fmt::Debug for SessionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAdapter")
            .field("name", &self.name)
            .field("server", &self.server)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<std::result::Result<T, ProtocolError>>
where
    F: Future<Output = std::result::Result<T, ProtocolError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RunnerError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        })
}

impl SessionAdapter {
    /// Launch the provider and complete the handshake.
    ///
    /// A session whose handshake fails is closed before the error returns.
    pub async fn open(
        connector: &dyn ProviderConnector,
        launch: &ResolvedLaunch,
        timeouts: CallTimeouts,
    ) -> Result<Self> {
        let launch_failed = |e: ProtocolError| RunnerError::LaunchFailed {
            name: launch.name.clone(),
            reason: e.to_string(),
        };

        let deadline = tokio::time::Instant::now() + timeouts.handshake;

        let session = bounded("launch", timeouts.handshake, connector.open(launch))
            .await?
            .map_err(launch_failed)?;

        // launch and initialize share one handshake budget
        let handshake = match tokio::time::timeout_at(deadline, session.initialize()).await {
            Ok(Ok(server)) => Ok(server),
            Ok(Err(e)) => Err(launch_failed(e)),
            Err(_) => Err(RunnerError::Timeout {
                operation: "initialize".to_string(),
                timeout_ms: timeouts.handshake.as_millis() as u64,
            }),
        };

        match handshake {
            Ok(server) => {
                debug!(
                    target: "session_adapter",
                    server = %launch.name,
                    server_name = %server.name,
                    "Session ready"
                );
                Ok(Self {
                    name: launch.name.clone(),
                    server,
                    session,
                    timeouts,
                })
            }
            Err(e) => {
                close_quietly(&launch.name, session.as_ref()).await;
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    pub async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        bounded("tools/list", self.timeouts.call, self.session.list_capabilities())
            .await?
            .map_err(|e| RunnerError::LaunchFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }

    pub async fn invoke(&self, tool: &str, arguments: serde_json::Value) -> Result<serde_json::Value> {
        bounded("tools/call", self.timeouts.call, self.session.invoke(tool, arguments))
            .await?
            .map_err(|e| RunnerError::InvocationFailed {
                tool: tool.to_string(),
                reason: e.to_string(),
            })
    }

    /// Best-effort teardown. Failures are logged, never returned.
    pub async fn close(&self) {
        close_quietly(&self.name, self.session.as_ref()).await;
    }
}

async fn close_quietly(name: &str, session: &dyn ProviderSession) {
    match tokio::time::timeout(CLOSE_TIMEOUT, session.close()).await {
        Ok(Ok(())) => {
            debug!(target: "session_adapter", server = %name, "Session closed");
        }
        Ok(Err(e)) => {
            let err = RunnerError::Teardown {
                name: name.to_string(),
                reason: e.to_string(),
            };
            warn!(target: "session_adapter", server = %name, error = %err, "Error closing session");
        }
        Err(_) => {
            warn!(
                target: "session_adapter",
                server = %name,
                timeout_ms = CLOSE_TIMEOUT.as_millis() as u64,
                "Timed out closing session"
            );
        }
    }
}
