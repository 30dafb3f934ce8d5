#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use toolhost_core::{
    CapabilityDescriptor, Clock, LaunchSpec, ManualClock, ProtocolError, ProviderConnector,
    ProviderSession, ResolvedLaunch, RunnerConfig, ServerIdentity, SessionManager, SharedConfig,
};

#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub invocations: AtomicUsize,
}

// Connector whose sessions answer from memory
pub struct FakeConnector {
    pub counters: Arc<Counters>,
    pub tools: Vec<CapabilityDescriptor>,
    pub fail_open: AtomicBool,
    pub fail_invoke: Arc<AtomicBool>,
    pub hang_initialize: bool,
    pub hang_invoke: bool,
    pub open_delay: Duration,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_tools(vec![
            CapabilityDescriptor::new("echo", "Echo the input back"),
            CapabilityDescriptor::new("add", "Add two numbers")
                .with_schema(json!({"type": "object", "properties": {"a": {"type": "number"}}})),
        ])
    }

    pub fn with_tools(tools: Vec<CapabilityDescriptor>) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            tools,
            fail_open: AtomicBool::new(false),
            fail_invoke: Arc::new(AtomicBool::new(false)),
            hang_initialize: false,
            hang_invoke: false,
            open_delay: Duration::ZERO,
        }
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.counters.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn open(&self, launch: &ResolvedLaunch) -> Result<Box<dyn ProviderSession>, ProtocolError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ProtocolError::Spawn(format!("{}: not found", launch.program)));
        }
        let serial = self.counters.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(FakeSession {
            serial,
            server_name: format!("{}-server", launch.name),
            counters: Arc::clone(&self.counters),
            tools: self.tools.clone(),
            fail_invoke: Arc::clone(&self.fail_invoke),
            hang_initialize: self.hang_initialize,
            hang_invoke: self.hang_invoke,
        }))
    }
}

pub struct FakeSession {
    serial: usize,
    server_name: String,
    counters: Arc<Counters>,
    tools: Vec<CapabilityDescriptor>,
    fail_invoke: Arc<AtomicBool>,
    hang_initialize: bool,
    hang_invoke: bool,
}

#[async_trait]
impl ProviderSession for FakeSession {
    async fn initialize(&self) -> Result<ServerIdentity, ProtocolError> {
        if self.hang_initialize {
            std::future::pending::<()>().await;
        }
        Ok(ServerIdentity::new(self.server_name.clone(), "0.1.0"))
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, ProtocolError> {
        Ok(self.tools.clone())
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ProtocolError> {
        self.counters.invocations.fetch_add(1, Ordering::SeqCst);
        if self.hang_invoke {
            std::future::pending::<()>().await;
        }
        if self.fail_invoke.load(Ordering::SeqCst) {
            return Err(ProtocolError::Closed);
        }
        Ok(json!({
            "content": [{"type": "text", "text": format!("{}:{}", name, arguments)}],
            "session": self.serial
        }))
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn spec(name: &str) -> LaunchSpec {
    LaunchSpec::new(name, "fake-provider").with_arg("--stdio")
}

pub fn manager_with(
    connector: Arc<FakeConnector>,
    config: RunnerConfig,
    clock: &ManualClock,
) -> SessionManager {
    SessionManager::with_clock(
        SharedConfig::new(config),
        connector as Arc<dyn ProviderConnector>,
        Arc::new(clock.clone()) as Arc<dyn Clock>,
    )
}
