/// Session manager behaviour against an in-memory provider
mod common;

use chrono::Duration;
use common::{manager_with, spec, FakeConnector};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use toolhost_core::{
    DiscoverResult, ExecuteResult, ManualClock, RunnerConfig, SessionStatus, StartResult,
};

fn setup() -> (Arc<FakeConnector>, ManualClock) {
    (Arc::new(FakeConnector::new()), ManualClock::default())
}

#[tokio::test]
async fn test_discover_caches_and_closes_transient_session() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    let first = manager.discover(&spec("fs")).await;
    let second = manager.discover(&spec("fs")).await;

    match &first {
        DiscoverResult::Success { tools, server_info } => {
            assert_eq!(tools.len(), 2);
            assert_eq!(server_info.name, "fs-server");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(first, second);
    assert_eq!(connector.opens(), 1);
    assert_eq!(connector.closes(), 1);
    assert_eq!(manager.cache().len(), 1);
    assert_eq!(manager.list_active().total_count, 0);
}

#[tokio::test]
async fn test_discover_rediscovers_after_ttl() {
    let (connector, clock) = setup();
    let config = RunnerConfig {
        cache_ttl_secs: 60,
        ..RunnerConfig::default()
    };
    let manager = manager_with(connector.clone(), config, &clock);

    manager.discover(&spec("fs")).await;
    clock.advance(Duration::seconds(59));
    manager.discover(&spec("fs")).await;
    assert_eq!(connector.opens(), 1);

    clock.advance(Duration::seconds(1));
    manager.discover(&spec("fs")).await;
    assert_eq!(connector.opens(), 2);
    assert_eq!(manager.cache().len(), 1);
}

#[tokio::test]
async fn test_discover_never_caches_empty_tool_list() {
    let connector = Arc::new(FakeConnector::with_tools(vec![]));
    let clock = ManualClock::default();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    let result = manager.discover(&spec("empty")).await;
    assert!(result.is_success());
    manager.discover(&spec("empty")).await;

    assert_eq!(connector.opens(), 2);
    assert!(manager.cache().is_empty());
}

#[tokio::test]
async fn test_discover_failure_reports_error() {
    let (connector, clock) = setup();
    connector.fail_open.store(true, Ordering::SeqCst);
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    let result = manager.discover(&spec("broken")).await;

    match result {
        DiscoverResult::Error { error, tools } => {
            assert!(error.contains("not found"));
            assert!(tools.is_empty());
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(manager.cache().is_empty());
}

#[tokio::test]
async fn test_cache_toggle_is_read_at_call_time() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    manager.discover(&spec("fs")).await;
    manager.config().update(|c| c.cache_enabled = false).await;
    manager.discover(&spec("fs")).await;

    assert_eq!(connector.opens(), 2);
    assert!(!manager.stats().await.cache_enabled);
}

#[tokio::test]
async fn test_execute_without_session_is_one_shot() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    let result = manager
        .execute("sess-1", &spec("fs"), "echo", json!({"text": "hi"}))
        .await;

    assert_eq!(
        result,
        ExecuteResult::Success {
            result: json!([{"type": "text", "text": "echo:{\"text\":\"hi\"}"}])
        }
    );
    assert_eq!(connector.opens(), 1);
    assert_eq!(connector.closes(), 1);
    assert_eq!(manager.status("sess-1"), SessionStatus::NotFound);

    manager
        .execute("sess-1", &spec("fs"), "echo", json!({}))
        .await;
    assert_eq!(connector.opens(), 2);
}

#[tokio::test]
async fn test_started_session_is_reused() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    let started = manager.start_session("sess-1", &spec("fs")).await;
    assert!(matches!(started, StartResult::Started { .. }));

    let created_at = match manager.status("sess-1") {
        SessionStatus::Running { created_at, .. } => created_at,
        other => panic!("expected running, got {:?}", other),
    };

    clock.advance(Duration::seconds(5));
    let first = manager.execute("sess-1", &spec("fs"), "echo", json!({})).await;
    clock.advance(Duration::seconds(5));
    let second = manager
        .execute("sess-1", &spec("fs"), "add", json!({"a": 1}))
        .await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(connector.opens(), 1);
    assert_eq!(connector.invocations(), 2);

    match manager.status("sess-1") {
        SessionStatus::Running {
            name,
            created_at: still_created,
            last_used,
        } => {
            assert_eq!(name, "fs-server");
            assert_eq!(still_created, created_at);
            assert_eq!(last_used, created_at + Duration::seconds(10));
        }
        other => panic!("expected running, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_session_twice_keeps_first() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    manager.start_session("sess-1", &spec("fs")).await;
    let again = manager.start_session("sess-1", &spec("fs")).await;

    assert_eq!(
        again,
        StartResult::Running {
            session_id: "sess-1".into(),
            name: "fs-server".into()
        }
    );
    assert_eq!(connector.opens(), 1);
}

#[tokio::test]
async fn test_concurrent_starts_launch_once() {
    let connector = Arc::new(FakeConnector {
        open_delay: std::time::Duration::from_millis(30),
        ..FakeConnector::new()
    });
    let clock = ManualClock::default();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    let spec_a = spec("fs");
    let spec_b = spec("fs");
    let (a, b) = tokio::join!(
        manager.start_session("shared", &spec_a),
        manager.start_session("shared", &spec_b)
    );

    let started = [&a, &b]
        .iter()
        .filter(|r| matches!(r, StartResult::Started { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(connector.opens(), 1);
    assert_eq!(manager.list_active().total_count, 1);
}

#[tokio::test]
async fn test_failed_invocation_evicts_session() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    manager.start_session("sess-1", &spec("fs")).await;
    connector.fail_invoke.store(true, Ordering::SeqCst);

    let failed = manager.execute("sess-1", &spec("fs"), "echo", json!({})).await;
    assert!(matches!(failed, ExecuteResult::Error { .. }));
    assert_eq!(manager.status("sess-1"), SessionStatus::NotFound);
    assert_eq!(connector.closes(), 1);

    connector.fail_invoke.store(false, Ordering::SeqCst);
    let retried = manager.execute("sess-1", &spec("fs"), "echo", json!({})).await;

    assert!(retried.is_success());
    assert_eq!(connector.opens(), 2);
    assert_eq!(manager.list_active().total_count, 0);
}

#[tokio::test]
async fn test_one_shot_failure_reports_error() {
    let (connector, clock) = setup();
    connector.fail_invoke.store(true, Ordering::SeqCst);
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    let result = manager.execute("sess-1", &spec("fs"), "echo", json!({})).await;

    assert_eq!(result, ExecuteResult::error("Connection closed"));
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    assert!(!manager.stop("missing").await);

    manager.start_session("sess-1", &spec("fs")).await;
    assert!(manager.stop("sess-1").await);
    assert!(!manager.stop("sess-1").await);
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn test_shutdown_drains_all_sessions() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    for id in ["a", "b", "c"] {
        manager.start_session(id, &spec(id)).await;
    }
    assert_eq!(manager.list_active().total_count, 3);

    assert_eq!(manager.shutdown().await, 3);
    assert_eq!(manager.list_active().total_count, 0);
    assert!(manager.list_active().sessions.is_empty());
    assert_eq!(connector.closes(), 3);
}

#[tokio::test]
async fn test_cleanup_reclaims_only_idle_sessions() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    manager.start_session("old", &spec("fs")).await;
    clock.advance(Duration::seconds(200));
    manager.start_session("young", &spec("fs")).await;
    clock.advance(Duration::seconds(150));

    assert_eq!(manager.cleanup_expired_sessions().await, 1);

    let active = manager.list_active();
    assert_eq!(active.total_count, 1);
    assert_eq!(active.sessions[0].session_id, "young");
}

#[tokio::test]
async fn test_cleanup_respects_touch() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    manager.start_session("sess-1", &spec("fs")).await;
    clock.advance(Duration::seconds(250));
    manager.execute("sess-1", &spec("fs"), "echo", json!({})).await;
    clock.advance(Duration::seconds(250));

    assert_eq!(manager.cleanup_expired_sessions().await, 0);
    assert_eq!(manager.list_active().total_count, 1);
}

#[tokio::test]
async fn test_cleanup_skips_session_with_call_in_flight() {
    let connector = Arc::new(FakeConnector {
        hang_invoke: true,
        ..FakeConnector::new()
    });
    let clock = ManualClock::default();
    let manager = Arc::new(manager_with(
        connector.clone(),
        RunnerConfig::default(),
        &clock,
    ));

    manager.start_session("s", &spec("fs")).await;
    let call = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.execute("s", &spec("fs"), "echo", json!({})).await })
    };
    while connector.invocations() == 0 {
        tokio::task::yield_now().await;
    }

    clock.advance(Duration::seconds(301));
    assert_eq!(manager.cleanup_expired_sessions().await, 0);
    assert_eq!(connector.closes(), 0);
    assert_eq!(manager.list_active().total_count, 1);

    // once the call is gone the idle session is reclaimed
    call.abort();
    assert!(call.await.unwrap_err().is_cancelled());
    assert_eq!(manager.cleanup_expired_sessions().await, 1);
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn test_cleanup_disabled() {
    let (connector, clock) = setup();
    let config = RunnerConfig {
        auto_cleanup: false,
        ..RunnerConfig::default()
    };
    let manager = manager_with(connector.clone(), config, &clock);

    manager.start_session("sess-1", &spec("fs")).await;
    clock.advance(Duration::days(1));

    assert_eq!(manager.cleanup_expired_sessions().await, 0);
    assert_eq!(manager.list_active().total_count, 1);
}

#[tokio::test]
async fn test_hung_invocation_times_out() {
    let connector = Arc::new(FakeConnector {
        hang_invoke: true,
        ..FakeConnector::new()
    });
    let clock = ManualClock::default();
    let config = RunnerConfig {
        call_timeout_ms: 50,
        ..RunnerConfig::default()
    };
    let manager = manager_with(connector.clone(), config, &clock);

    let result = manager.execute("sess-1", &spec("fs"), "echo", json!({})).await;

    match result {
        ExecuteResult::Error { error } => assert!(error.contains("timed out after 50ms")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(connector.closes(), 1);
}

#[tokio::test]
async fn test_hung_handshake_times_out() {
    let connector = Arc::new(FakeConnector {
        hang_initialize: true,
        ..FakeConnector::new()
    });
    let clock = ManualClock::default();
    let config = RunnerConfig {
        handshake_timeout_ms: 50,
        ..RunnerConfig::default()
    };
    let manager = manager_with(connector.clone(), config, &clock);

    let started = manager.start_session("sess-1", &spec("fs")).await;

    match started {
        StartResult::Error { error } => assert!(error.contains("initialize timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(connector.closes(), 1);
    assert_eq!(manager.list_active().total_count, 0);
}

#[tokio::test]
async fn test_stats_and_listing() {
    let (connector, clock) = setup();
    let manager = manager_with(connector.clone(), RunnerConfig::default(), &clock);

    manager.discover(&spec("fs")).await;
    manager.start_session("b", &spec("fs")).await;
    clock.advance(Duration::seconds(1));
    manager.start_session("a", &spec("git")).await;

    let stats = manager.stats().await;
    assert_eq!(stats.active_sessions, 2);
    assert_eq!(stats.cached_tools, 1);
    assert!(stats.cache_enabled);
    assert!(stats.auto_cleanup_enabled);

    let listing = serde_json::to_value(manager.list_active()).unwrap();
    assert_eq!(listing["total_count"], 2);
    assert_eq!(listing["sessions"][0]["session_id"], "b");
    assert_eq!(listing["sessions"][1]["name"], "git-server");
}
