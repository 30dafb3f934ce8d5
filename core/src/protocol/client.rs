/// Stdio provider client
///
/// Spawns a provider process and speaks newline-delimited JSON-RPC 2.0 over
/// its stdin/stdout, correlating responses to requests by id. Timeouts are
/// applied by the caller (`SessionAdapter`), not here.
use super::types::*;
use super::{ProtocolError, ProviderConnector, ProviderSession};
use crate::launch::ResolvedLaunch;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// How long `close` waits for the process to exit after stdin is closed
const EXIT_GRACE: Duration = Duration::from_secs(2);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcMessage>>>>;

/// JSON-RPC client for a single provider process
pub struct StdioClient {
    /// Provider name for logging
    name: String,
    protocol_version: String,
    client_name: String,
    /// Child process handle
    process: Mutex<Option<Child>>,
    /// Stdin writer
    stdin: Mutex<Option<ChildStdin>>,
    /// Request ID counter
    request_id: AtomicU64,
    /// Pending requests: request_id -> response channel
    pending: PendingMap,
}

impl StdioClient {
    /// Start the provider process and the stdout/stderr reader tasks.
    ///
    /// The handshake is not performed here; call `initialize`.
    pub fn spawn(
        launch: &ResolvedLaunch,
        protocol_version: &str,
        client_name: &str,
    ) -> Result<Self, ProtocolError> {
        info!(
            target: "stdio_client",
            server = %launch.name,
            command = %launch.command_line(),
            "Spawning provider process"
        );

        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| {
            error!(target: "stdio_client", server = %launch.name, error = %e, "Failed to spawn provider process");
            ProtocolError::Spawn(format!("{}: {}", launch.program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProtocolError::Spawn("Failed to capture stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProtocolError::Spawn("Failed to capture stdout".to_string()))?;

        let mut client = Self {
            name: launch.name.clone(),
            protocol_version: protocol_version.to_string(),
            client_name: client_name.to_string(),
            process: Mutex::new(None),
            stdin: Mutex::new(Some(stdin)),
            request_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        };

        if let Some(stderr) = child.stderr.take() {
            client.spawn_stderr_drain(stderr);
        }
        client.spawn_reader(stdout);
        *client.process.get_mut() = Some(child);

        Ok(client)
    }

    /// Send a JSON-RPC request and wait for its response
    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ProtocolError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        // Register pending request
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(id),
            method: method.to_string(),
            params,
        };

        if let Err(e) = self.write_line(&serde_json::to_string(&request)?).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        // Sender is dropped when the reader task exits
        let response = rx.await.map_err(|_| ProtocolError::Closed)?;

        if let Some(error) = response.error {
            return Err(ProtocolError::Server {
                code: error.code,
                message: error.message,
            });
        }

        response
            .result
            .ok_or_else(|| ProtocolError::Protocol(format!("Missing result in {} response", method)))
    }

    /// Send a JSON-RPC notification (no response expected)
    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ProtocolError> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.write_line(&serde_json::to_string(&notification)?).await
    }

    async fn write_line(&self, payload: &str) -> Result<(), ProtocolError> {
        let mut line = String::with_capacity(payload.len() + 1);
        line.push_str(payload);
        line.push('\n');

        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard.as_mut().ok_or(ProtocolError::Closed)?;

        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            error!(target: "stdio_client", server = %self.name, error = %e, "Failed to write request");
            ProtocolError::Io(e)
        })?;

        stdin.flush().await.map_err(|e| {
            error!(target: "stdio_client", server = %self.name, error = %e, "Failed to flush stdin");
            ProtocolError::Io(e)
        })
    }

    /// Spawn stdout reader task
    fn spawn_reader(&self, stdout: ChildStdout) {
        let pending = Arc::clone(&self.pending);
        let server_name = self.name.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "stdio_client", server = %server_name, error = %e, "Failed to read provider stdout");
                        break;
                    }
                }
                if buf.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }

                match serde_json::from_slice::<JsonRpcMessage>(&buf) {
                    Ok(message) if message.method.is_some() => {
                        debug!(
                            target: "stdio_client",
                            server = %server_name,
                            method = ?message.method,
                            "Ignoring server-initiated message"
                        );
                    }
                    Ok(message) => {
                        let Some(id) = message.id.as_ref().and_then(|id| id.as_u64()) else {
                            warn!(target: "stdio_client", server = %server_name, "Response without numeric id");
                            continue;
                        };
                        if let Some(tx) = pending.lock().await.remove(&id) {
                            let _ = tx.send(message);
                        } else {
                            warn!(
                                target: "stdio_client",
                                server = %server_name,
                                id = id,
                                "Received response for unknown request"
                            );
                        }
                    }
                    Err(e) => {
                        let text = String::from_utf8_lossy(&buf);
                        warn!(
                            target: "stdio_client",
                            server = %server_name,
                            error = %e,
                            line = %text.trim_end(),
                            "Skipping unparsable stdout line"
                        );
                    }
                }
            }

            // Fail every in-flight request instead of leaving it waiting
            pending.lock().await.clear();
            debug!(target: "stdio_client", server = %server_name, "Stdout reader exited");
        });
    }

    /// Keep the stderr pipe drained so a chatty provider never blocks
    fn spawn_stderr_drain(&self, stderr: ChildStderr) {
        let server_name = self.name.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            while let Ok(n) = reader.read_until(b'\n', &mut buf).await {
                if n == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                debug!(target: "stdio_client", server = %server_name, stderr = %line.trim_end(), "Provider stderr");
                buf.clear();
            }
        });
    }
}

#[async_trait]
impl ProviderSession for StdioClient {
    async fn initialize(&self) -> Result<ServerIdentity, ProtocolError> {
        let params = InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.client_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result = self.send_request("initialize", Some(json!(params))).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ProtocolError::Protocol(format!("Invalid initialize result: {}", e)))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            warn!(
                target: "stdio_client",
                server = %self.name,
                protocol_version = %init.protocol_version,
                "Provider negotiated an unrecognised protocol version"
            );
        }

        self.notify("notifications/initialized", None).await?;

        let identity = ServerIdentity::from(init.server_info);
        info!(
            target: "stdio_client",
            server = %self.name,
            server_name = %identity.name,
            server_version = %identity.version,
            "Provider initialized"
        );
        Ok(identity)
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, ProtocolError> {
        debug!(target: "stdio_client", server = %self.name, "Listing tools");

        let mut all_tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = ListToolsParams { cursor };
            let result = self.send_request("tools/list", Some(json!(params))).await?;

            let list_result: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| ProtocolError::Protocol(format!("Invalid tools/list result: {}", e)))?;

            all_tools.extend(list_result.tools.into_iter().map(CapabilityDescriptor::from));

            if list_result.next_cursor.is_none() {
                break;
            }
            cursor = list_result.next_cursor;
        }

        debug!(
            target: "stdio_client",
            server = %self.name,
            count = all_tools.len(),
            "Listed tools"
        );

        Ok(all_tools)
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ProtocolError> {
        debug!(target: "stdio_client", server = %self.name, tool = %name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.send_request("tools/call", Some(json!(params))).await
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        debug!(target: "stdio_client", server = %self.name, "Closing provider session");

        // Closing stdin asks a well-behaved provider to exit
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(mut child) = self.process.lock().await.take() {
            match timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(target: "stdio_client", server = %self.name, status = %status, "Provider exited");
                }
                Ok(Err(e)) => return Err(ProtocolError::Io(e)),
                Err(_) => {
                    child.kill().await?;
                    debug!(target: "stdio_client", server = %self.name, "Provider killed after grace period");
                }
            }
        }

        Ok(())
    }
}

/// Launches `StdioClient` sessions
#[derive(Debug, Clone)]
pub struct StdioConnector {
    protocol_version: String,
    client_name: String,
}

impl StdioConnector {
    pub fn new(protocol_version: impl Into<String>) -> Self {
        Self {
            protocol_version: protocol_version.into(),
            client_name: "toolhost".to_string(),
        }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }
}

impl Default for StdioConnector {
    fn default() -> Self {
        Self::new(DEFAULT_PROTOCOL_VERSION)
    }
}

#[async_trait]
impl ProviderConnector for StdioConnector {
    async fn open(&self, launch: &ResolvedLaunch) -> Result<Box<dyn ProviderSession>, ProtocolError> {
        let client = StdioClient::spawn(launch, &self.protocol_version, &self.client_name)?;
        Ok(Box::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: json!(1),
            method: "tools/list".to_string(),
            params: Some(json!({})),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.starts_with("{\"jsonrpc\":\"2.0\",\"id\":1,"));
        assert!(json.contains("\"method\":\"tools/list\""));
    }

    #[test]
    fn test_protocol_error_codes() {
        assert_eq!(ProtocolError::Closed.code(), "CONNECTION_CLOSED");
        assert_eq!(
            ProtocolError::Server {
                code: -32601,
                message: "Method not found".into()
            }
            .code(),
            "SERVER_ERROR"
        );
        assert_eq!(ProtocolError::Spawn("x".into()).code(), "SPAWN_ERROR");
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let launch = ResolvedLaunch {
            name: "missing".into(),
            program: "nonexistent-command-12345".into(),
            args: vec![],
            env: HashMap::new(),
        };

        let result = StdioConnector::default().open(&launch).await;
        assert!(matches!(result, Err(ProtocolError::Spawn(_))));
    }
}
