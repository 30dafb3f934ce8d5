//! Stdio client against a shell-scripted provider
#![cfg(unix)]

use serde_json::json;
use std::sync::Arc;
use toolhost_core::{
    DiscoverResult, ExecuteResult, LaunchSpec, ProviderConnector, ProviderSession, ResolvedLaunch,
    RunnerConfig, SessionManager, SharedConfig, StartResult, StdioConnector,
};

// Answers initialize, tools/list and tools/call; emits a log notification
// before each call result and some stderr noise on startup.
const PROVIDER: &str = r#"
echo "provider booting" >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"sh-echo","version":"0.0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"Reply with pong","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*'"name":"ping"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"Unknown tool"}}\n' "$id" ;;
  esac
done
"#;

// Writes a non-UTF-8 line ahead of the initialize reply and reports the
// inherited TOOLHOST_STDIO_MARKER variable as its server name.
const NOISY_PROVIDER: &str = r#"
IFS= read -r line
id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
printf '\377\376 not json\n'
printf '\377 stderr noise\n' >&2
printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"%s","version":"1"}}}\n' "$id" "$TOOLHOST_STDIO_MARKER"
cat >/dev/null
"#;

fn provider_spec() -> LaunchSpec {
    LaunchSpec::new("sh-echo", "sh").with_args(["-c", PROVIDER])
}

fn resolved(script: &str) -> ResolvedLaunch {
    LaunchSpec::new("sh", "sh")
        .with_args(["-c", script])
        .resolve(&RunnerConfig::default())
}

#[tokio::test]
async fn test_handshake_list_and_call() {
    let session = StdioConnector::default()
        .open(&resolved(PROVIDER))
        .await
        .unwrap();

    let server = session.initialize().await.unwrap();
    assert_eq!(server.name, "sh-echo");
    assert_eq!(server.version, "0.0.1");

    let tools = session.list_capabilities().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "ping");
    assert_eq!(tools[0].input_schema, json!({"type": "object"}));

    let result = session.invoke("ping", json!({})).await.unwrap();
    assert_eq!(result["content"][0]["text"], "pong");

    let err = session.invoke("missing", json!({})).await.unwrap_err();
    assert_eq!(err.code(), "SERVER_ERROR");
    assert!(err.to_string().contains("Unknown tool"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_provider_exit_fails_pending_request() {
    let session = StdioConnector::default()
        .open(&resolved("read line; exit 0"))
        .await
        .unwrap();

    assert!(session.initialize().await.is_err());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_manager_end_to_end() {
    let manager = SessionManager::new(
        SharedConfig::new(RunnerConfig::default()),
        Arc::new(StdioConnector::default()),
    );

    match manager.discover(&provider_spec()).await {
        DiscoverResult::Success { tools, server_info } => {
            assert_eq!(tools[0].name, "ping");
            assert_eq!(server_info.name, "sh-echo");
        }
        other => panic!("discovery failed: {:?}", other),
    }

    let started = manager.start_session("e2e", &provider_spec()).await;
    assert!(matches!(started, StartResult::Started { .. }));

    let result = manager
        .execute("e2e", &provider_spec(), "ping", json!({}))
        .await;
    assert_eq!(
        result,
        ExecuteResult::Success {
            result: json!([{"type": "text", "text": "pong"}])
        }
    );

    assert_eq!(manager.shutdown().await, 1);
}

#[tokio::test]
async fn test_undecodable_stdout_line_is_skipped_and_env_is_inherited() {
    std::env::set_var("TOOLHOST_STDIO_MARKER", "inherited-marker");
    let session = StdioConnector::default()
        .open(&resolved(NOISY_PROVIDER))
        .await
        .unwrap();
    std::env::remove_var("TOOLHOST_STDIO_MARKER");

    let server = session.initialize().await.unwrap();
    assert_eq!(server.name, "inherited-marker");

    session.close().await.unwrap();
}
