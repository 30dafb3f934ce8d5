/// Session Manager
///
/// Composes the capability cache, session registry and provider connector
/// into the operations the gateway exposes: discover, start, execute, stop,
/// status, enumerate, stats and the expiry/shutdown hooks.
///
/// Every operation that checks the registry and may then create or remove a
/// session for an id runs under that id's lock, so two concurrent calls for
/// one id never both launch a provider. Different ids never block each other.
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::adapter::{CallTimeouts, SessionAdapter};
use crate::cache::CapabilityCache;
use crate::clock::{Clock, SystemClock};
use crate::config::SharedConfig;
use crate::launch::LaunchSpec;
use crate::locks::KeyedLocks;
use crate::outcome::{
    ActiveSessions, DiscoverResult, ExecuteResult, ManagerStats, SessionStatus, StartResult,
};
use crate::protocol::{CapabilityDescriptor, ProviderConnector, ServerIdentity};
use crate::registry::SessionRegistry;
use crate::{short_id, Result, RunnerError};

pub struct SessionManager {
    config: SharedConfig,
    connector: Arc<dyn ProviderConnector>,
    cache: CapabilityCache,
    registry: SessionRegistry,
    locks: KeyedLocks,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(config: SharedConfig, connector: Arc<dyn ProviderConnector>) -> Self {
        Self::with_clock(config, connector, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SharedConfig,
        connector: Arc<dyn ProviderConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: CapabilityCache::new(config.clone(), Arc::clone(&clock)),
            registry: SessionRegistry::new(Arc::clone(&clock)),
            locks: KeyedLocks::new(),
            config,
            connector,
            clock,
        }
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    /// Resolve the launch spec against current config and complete a handshake
    async fn open_adapter(&self, spec: &LaunchSpec) -> Result<SessionAdapter> {
        let (launch, timeouts) = {
            let config = self.config.read().await;
            (spec.resolve(&config), CallTimeouts::from_config(&config))
        };
        debug!(
            target: "session_manager",
            server = %spec.name,
            command = %launch.command_line(),
            "Opening provider session"
        );
        SessionAdapter::open(self.connector.as_ref(), &launch, timeouts).await
    }

    /// List a provider's tools, from cache when a fresh entry exists.
    pub async fn discover(&self, spec: &LaunchSpec) -> DiscoverResult {
        if let Some(entry) = self.cache.lookup(spec).await {
            debug!(target: "session_manager", server = %spec.name, "Returning cached tools");
            return DiscoverResult::Success {
                tools: entry.capabilities,
                server_info: entry.server,
            };
        }

        info!(target: "session_manager", server = %spec.name, "Discovering tools");

        match self.discover_uncached(spec).await {
            Ok((tools, server_info)) => {
                info!(
                    target: "session_manager",
                    server = %spec.name,
                    tool_count = tools.len(),
                    "Discovered tools"
                );
                self.cache
                    .store(spec, tools.clone(), server_info.clone())
                    .await;
                DiscoverResult::Success { tools, server_info }
            }
            Err(e) => {
                error!(
                    target: "session_manager",
                    server = %spec.name,
                    error = %e,
                    code = e.code(),
                    "Tool discovery failed"
                );
                DiscoverResult::error(e.to_string())
            }
        }
    }

    async fn discover_uncached(
        &self,
        spec: &LaunchSpec,
    ) -> Result<(Vec<CapabilityDescriptor>, ServerIdentity)> {
        let adapter = self.open_adapter(spec).await?;
        let listed = adapter.list_capabilities().await;
        adapter.close().await;
        Ok((listed?, adapter.server().clone()))
    }

    /// Launch a provider and keep it registered under `session_id`.
    ///
    /// An id that already names a live session is left as is.
    pub async fn start_session(&self, session_id: &str, spec: &LaunchSpec) -> StartResult {
        let _guard = self.locks.lock(session_id).await;

        if let Some(existing) = self.registry.snapshot(session_id) {
            debug!(
                target: "session_manager",
                session = %short_id(session_id),
                "Session already running"
            );
            return StartResult::Running {
                session_id: session_id.to_string(),
                name: existing.name,
            };
        }

        info!(
            target: "session_manager",
            session = %short_id(session_id),
            server = %spec.name,
            "Starting session"
        );

        match self.open_adapter(spec).await {
            Ok(adapter) => {
                let server_info = adapter.server().clone();
                self.registry
                    .put(session_id, adapter, &server_info.name)
                    .await;
                StartResult::Started {
                    session_id: session_id.to_string(),
                    server_info,
                }
            }
            Err(e) => {
                error!(
                    target: "session_manager",
                    session = %short_id(session_id),
                    server = %spec.name,
                    error = %e,
                    "Session start failed"
                );
                StartResult::Error {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Invoke a tool on the live session for `session_id`, or on a one-shot
    /// session when none is registered. One-shot sessions are never kept.
    pub async fn execute(
        &self,
        session_id: &str,
        spec: &LaunchSpec,
        tool_name: &str,
        arguments: Value,
    ) -> ExecuteResult {
        info!(
            target: "session_manager",
            session = %short_id(session_id),
            tool = %tool_name,
            "Executing tool"
        );
        debug!(target: "session_manager", arguments = %arguments, "Tool arguments");

        let _guard = self.locks.lock(session_id).await;

        match self.registry.checkout(session_id) {
            Some(adapter) => {
                debug!(target: "session_manager", session = %short_id(session_id), "Using existing session");
                self.registry.touch(session_id);

                match adapter.invoke(tool_name, arguments).await {
                    Ok(raw) => {
                        self.registry.touch(session_id);
                        ExecuteResult::from_raw(raw)
                    }
                    Err(e) => {
                        error!(
                            target: "session_manager",
                            session = %short_id(session_id),
                            tool = %tool_name,
                            error = %e,
                            "Tool execution failed with existing session"
                        );
                        // the next call for this id gets a fresh provider
                        drop(adapter);
                        self.registry.remove(session_id).await;
                        ExecuteResult::error(e.to_string())
                    }
                }
            }
            None => match self.execute_one_shot(spec, tool_name, arguments).await {
                Ok(raw) => ExecuteResult::from_raw(raw),
                Err(e) => {
                    error!(
                        target: "session_manager",
                        session = %short_id(session_id),
                        tool = %tool_name,
                        error = %e,
                        "Tool execution failed with new session"
                    );
                    ExecuteResult::error(e.to_string())
                }
            },
        }
    }

    async fn execute_one_shot(
        &self,
        spec: &LaunchSpec,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value> {
        let adapter = self.open_adapter(spec).await?;
        debug!(
            target: "session_manager",
            server = %adapter.server().name,
            "One-shot session initialized"
        );
        let result = adapter.invoke(tool_name, arguments).await;
        adapter.close().await;
        result
    }

    /// Stop and forget a live session. Returns false for unknown ids.
    pub async fn stop(&self, session_id: &str) -> bool {
        let _guard = self.locks.lock(session_id).await;

        if self.registry.remove(session_id).await {
            info!(target: "session_manager", session = %short_id(session_id), "Server stopped");
            true
        } else {
            let err = RunnerError::SessionNotFound(session_id.to_string());
            warn!(target: "session_manager", session = %short_id(session_id), code = err.code(), "{}", err);
            false
        }
    }

    pub fn status(&self, session_id: &str) -> SessionStatus {
        SessionStatus::from(self.registry.snapshot(session_id))
    }

    pub fn list_active(&self) -> ActiveSessions {
        ActiveSessions::from(self.registry.list_all())
    }

    pub async fn stats(&self) -> ManagerStats {
        let config = self.config.read().await;
        ManagerStats {
            active_sessions: self.registry.count(),
            cached_tools: self.cache.len(),
            cache_enabled: config.cache_enabled,
            auto_cleanup_enabled: config.auto_cleanup,
            platform: config.platform.clone(),
            is_windows: config.is_windows,
        }
    }

    /// Close sessions idle longer than the configured timeout.
    ///
    /// Sessions with a call in flight are left alone until a later sweep.
    /// Does nothing when auto-cleanup is disabled. Returns how many sessions
    /// were reclaimed.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let (enabled, timeout) = {
            let config = self.config.read().await;
            (config.auto_cleanup, config.session_timeout())
        };
        if !enabled {
            return 0;
        }

        let now = self.clock.now();
        let mut reclaimed = 0;
        for session_id in self.registry.idle_since(now, timeout) {
            // a held id lock means a call is in flight on this session
            let Some(_guard) = self.locks.try_lock(&session_id) else {
                debug!(
                    target: "session_manager",
                    session = %short_id(&session_id),
                    "Skipping busy session during cleanup"
                );
                continue;
            };
            if self.registry.remove_if_idle(&session_id, now, timeout).await {
                info!(
                    target: "session_manager",
                    session = %short_id(&session_id),
                    "Cleaned up expired session"
                );
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Close every live session. Called once when the host shuts down.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.drain().await;
        info!(target: "session_manager", closed = closed, "All sessions closed");
        closed
    }
}
