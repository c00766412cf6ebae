// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests over an assembled control plane
//!
//! Each test builds a control plane on in-memory repositories and a
//! temporary payload directory. Agents are played by `mockito` servers.

use brain_control_plane_core::application::dispatcher::{
    ExecuteOptions, ExecutionDispatcher, WebhookSpec,
};
use brain_control_plane_core::application::presence::LEASE_EXPIRED_REASON;
use brain_control_plane_core::application::repository_factory::Repositories;
use brain_control_plane_core::domain::agent::{
    AgentId, AgentNode, AgentState, HealthStatus, TargetKind, PROBE_RUNNING_SCORE,
};
use brain_control_plane_core::domain::events::AgentEvent;
use brain_control_plane_core::domain::execution::{
    Execution, ExecutionId, ExecutionStatus, RunId, TIMED_OUT_MESSAGE,
};
use brain_control_plane_core::domain::webhook::DeliveryStatus;
use brain_control_plane_core::infrastructure::{FilePayloadStore, HttpAgentClient};
use brain_control_plane_core::{ControlPlane, ControlPlaneConfig};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    plane: ControlPlane,
    _payloads: TempDir,
}

fn harness(configure: impl FnOnce(&mut ControlPlaneConfig)) -> Harness {
    let payloads = tempfile::tempdir().unwrap();
    let mut config = ControlPlaneConfig::default();
    config.storage.payload_dir = payloads.path().to_path_buf();
    configure(&mut config);

    let repositories = Repositories::in_memory();
    let client = Arc::new(HttpAgentClient::new(repositories.agents.clone()));
    let store = Arc::new(FilePayloadStore::new(payloads.path()).unwrap());
    Harness {
        plane: ControlPlane::assemble(config, repositories, store, client),
        _payloads: payloads,
    }
}

fn agent(id: &str, base_url: &str) -> AgentNode {
    AgentNode::new(AgentId::from(id), "team-1", base_url, "1.0.0")
        .with_reasoners(["summarize"])
        .with_skills(["fetch"])
}

async fn wait_for_terminal(h: &Harness, execution_id: &ExecutionId) -> ExecutionStatus {
    for _ in 0..250 {
        let view = h
            .plane
            .dispatcher
            .get_execution_status(execution_id)
            .await
            .unwrap();
        if view.status.is_terminal() {
            return view.status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("execution {} never reached a terminal status", execution_id);
}

#[tokio::test(start_paused = true)]
async fn test_presence_expiry_marks_agent_inactive() {
    let h = harness(|config| {
        config.health.enabled = false;
        config.presence.heartbeat_ttl = Duration::from_secs(2);
    });
    let mut events = h.plane.events.agents.subscribe();

    let id = h.plane.registry.register(agent("agent-a", "http://127.0.0.1:1")).await.unwrap().id;
    let snapshot = h.plane.registry.heartbeat(&id).await.unwrap();
    assert_eq!(snapshot.state, AgentState::Active);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(h.plane.presence.sweep().await, 1);

    let snapshot = h.plane.status.get_agent_status_snapshot(&id, None).await.unwrap();
    assert_eq!(snapshot.state, AgentState::Inactive);
    assert_eq!(snapshot.health_status, HealthStatus::Inactive);
    assert_eq!(snapshot.reason.as_deref(), Some(LEASE_EXPIRED_REASON));

    let mut went_offline = false;
    while let Ok(event) = events.try_recv() {
        if let AgentEvent::AgentOffline { agent_id, reason, .. } = event {
            assert_eq!(agent_id, id);
            assert_eq!(reason.as_deref(), Some(LEASE_EXPIRED_REASON));
            went_offline = true;
        }
    }
    assert!(went_offline);

    // The same expiry is not reported twice.
    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(h.plane.presence.sweep().await, 0);
}

#[tokio::test]
async fn test_sync_dispatch_returns_agent_result() {
    let mut server = mockito::Server::new_async().await;
    let invoke = server
        .mock("POST", "/reasoners/summarize")
        .match_header("x-run-id", mockito::Matcher::Any)
        .match_body(mockito::Matcher::Json(json!({"text": "hello"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(|_| {
            std::thread::sleep(Duration::from_millis(5));
            br#"{"answer":42}"#.to_vec()
        })
        .create_async()
        .await;

    let h = harness(|config| config.health.enabled = false);
    h.plane.registry.register(agent("agent-a", &server.url())).await.unwrap();

    let response = h
        .plane
        .dispatcher
        .execute("agent-a.summarize", json!({"text": "hello"}), ExecuteOptions::default())
        .await
        .unwrap();

    invoke.assert_async().await;
    assert_eq!(response.status, ExecutionStatus::Succeeded);
    assert_eq!(response.target_type, TargetKind::Reasoner);
    assert_eq!(response.result, Some(json!({"answer": 42})));
    assert!(response.duration_ms.unwrap() > 0);

    let view = h
        .plane
        .dispatcher
        .get_execution_status(&response.execution_id)
        .await
        .unwrap();
    assert_eq!(view.result, Some(json!({"answer": 42})));
    assert!(!view.webhook_registered);

    let detail = h.plane.workflows.get_run_detail(&response.run_id).await.unwrap();
    assert_eq!(detail.summary.status, ExecutionStatus::Succeeded);
    assert_eq!(detail.completed_steps, 1);

    let summary = h.plane.dashboard.summary().await.unwrap();
    assert_eq!(summary.executions.today, 1);
    assert_eq!(summary.success_rate, 100.0);
}

#[tokio::test]
async fn test_async_dispatch_then_poll() {
    let mut server = mockito::Server::new_async().await;
    let _invoke = server
        .mock("POST", "/skills/fetch")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"rows":3}"#)
        .create_async()
        .await;

    let h = harness(|config| config.health.enabled = false);
    h.plane.registry.register(agent("agent-b", &server.url())).await.unwrap();

    let accepted = h
        .plane
        .dispatcher
        .execute_async("agent-b.fetch", json!({}), ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(accepted.status, ExecutionStatus::Pending);

    assert_eq!(
        wait_for_terminal(&h, &accepted.execution_id).await,
        ExecutionStatus::Succeeded
    );
    let view = h
        .plane
        .dispatcher
        .get_execution_status(&accepted.execution_id)
        .await
        .unwrap();
    assert_eq!(view.result, Some(json!({"rows": 3})));

    let batch = h
        .plane
        .dispatcher
        .batch_execution_status(&[accepted.execution_id.clone(), ExecutionId::from("missing")])
        .await
        .unwrap();
    assert_eq!(batch[&accepted.execution_id].status(), "succeeded");
    assert_eq!(batch[&ExecutionId::from("missing")].status(), "not_found");
}

#[tokio::test]
async fn test_failed_dispatch_delivers_webhook() {
    let mut server = mockito::Server::new_async().await;
    let _invoke = server
        .mock("POST", "/reasoners/summarize")
        .with_status(500)
        .with_body("model overloaded")
        .create_async()
        .await;
    let hook = server
        .mock("POST", "/hook")
        .match_header("x-brain-event", "execution.failed")
        .match_header("x-brain-signature", mockito::Matcher::Regex("^sha256=[0-9a-f]{64}$".into()))
        .with_status(204)
        .create_async()
        .await;

    let h = harness(|config| config.health.enabled = false);
    h.plane.registry.register(agent("agent-c", &server.url())).await.unwrap();

    let options = ExecuteOptions {
        webhook: Some(WebhookSpec {
            url: format!("{}/hook", server.url()),
            secret: Some("s3cret".into()),
            ..Default::default()
        }),
        ..Default::default()
    };
    let response = h
        .plane
        .dispatcher
        .execute("agent-c.summarize", json!({}), options)
        .await
        .unwrap();
    assert_eq!(response.status, ExecutionStatus::Failed);
    assert!(response.error_message.unwrap().contains("500"));

    let mut delivered = Vec::new();
    for _ in 0..250 {
        let view = h
            .plane
            .dispatcher
            .get_execution_status(&response.execution_id)
            .await
            .unwrap();
        assert!(view.webhook_registered);
        delivered = view.webhook_events;
        if delivered.iter().any(|e| e.event_type == "execution.failed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let failed = delivered
        .iter()
        .find(|e| e.event_type == "execution.failed")
        .expect("failure webhook recorded");
    assert_eq!(failed.status, DeliveryStatus::Delivered);
    assert_eq!(failed.http_status, Some(204));
    hook.assert_async().await;
}

#[tokio::test]
async fn test_reaper_times_out_stale_execution() {
    let h = harness(|config| {
        config.health.enabled = false;
        config.executions.stale_after = Duration::from_secs(60);
    });

    for (id, age) in [("stuck", 90), ("recent", 30)] {
        let execution = Execution::new(
            ExecutionId::from(id),
            RunId::from("run-1"),
            AgentId::from("agent-a"),
            "summarize",
            TargetKind::Reasoner,
            ExecutionStatus::Running,
            Utc::now() - chrono::Duration::seconds(age),
        );
        h.plane.repositories.executions.create(&execution).await.unwrap();
    }

    assert_eq!(h.plane.reaper.sweep().await.unwrap(), 1);

    let stuck = h
        .plane
        .dispatcher
        .get_execution_status(&ExecutionId::from("stuck"))
        .await
        .unwrap();
    assert_eq!(stuck.status, ExecutionStatus::Timeout);
    assert_eq!(stuck.error_message.as_deref(), Some(TIMED_OUT_MESSAGE));
    assert!(stuck.duration_ms.unwrap() >= 90_000);

    let recent = h
        .plane
        .dispatcher
        .get_execution_status(&ExecutionId::from("recent"))
        .await
        .unwrap();
    assert_eq!(recent.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn test_reaped_execution_keeps_timeout_when_agent_answers_late() {
    let mut server = mockito::Server::new_async().await;
    let _slow = server
        .mock("POST", "/reasoners/summarize")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(|_| {
            std::thread::sleep(Duration::from_millis(400));
            br#"{"answer":42}"#.to_vec()
        })
        .create_async()
        .await;

    let h = harness(|config| {
        config.health.enabled = false;
        config.executions.stale_after = Duration::from_millis(1);
    });
    h.plane.registry.register(agent("agent-e", &server.url())).await.unwrap();

    let dispatcher = h.plane.dispatcher.clone();
    let call = tokio::spawn(async move {
        dispatcher
            .execute("agent-e.summarize", json!({}), ExecuteOptions::default())
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.plane.reaper.sweep().await.unwrap(), 1);
    let reaped = h
        .plane
        .repositories
        .executions
        .query(&Default::default())
        .await
        .unwrap()
        .remove(0);
    assert_eq!(reaped.status, ExecutionStatus::Timeout);

    // The agent's late answer does not replace the reaper's outcome.
    let response = call.await.unwrap().unwrap();
    assert_eq!(response.execution_id, reaped.execution_id);
    assert_eq!(response.status, ExecutionStatus::Timeout);
    assert_eq!(response.result, None);

    let stored = h
        .plane
        .repositories
        .executions
        .find_by_id(&reaped.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Timeout);
    assert_eq!(stored.error_message.as_deref(), Some(TIMED_OUT_MESSAGE));
    assert_eq!(stored.completed_at, reaped.completed_at);
    assert_eq!(stored.duration_ms, reaped.duration_ms);
    assert_eq!(stored.result_uri, None);
}

#[tokio::test]
async fn test_health_check_debounces_recovery() {
    let mut server = mockito::Server::new_async().await;
    let running = server
        .mock("GET", "/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"running"}"#)
        .create_async()
        .await;
    let _mcp = server
        .mock("GET", "/mcp/health")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"summary":{"total_servers":2,"running_servers":2,"total_tools":7,"overall_health":1.0}}"#,
        )
        .create_async()
        .await;

    let h = harness(|config| config.health.stability_window = Duration::from_secs(30));
    let health = h.plane.health.clone().unwrap();
    let id = h.plane.registry.register(agent("agent-d", &server.url())).await.unwrap().id;

    assert_eq!(health.check_agent(&id).await, Some(HealthStatus::Active));
    let snapshot = h.plane.status.get_agent_status_snapshot(&id, None).await.unwrap();
    assert_eq!(snapshot.state, AgentState::Active);
    assert_eq!(snapshot.health_score, PROBE_RUNNING_SCORE);
    assert_eq!(health.mcp_health_cache()[&id].total_tools, 7);

    running.remove_async().await;
    let down = server
        .mock("GET", "/status")
        .with_status(503)
        .create_async()
        .await;
    assert_eq!(health.check_agent(&id).await, Some(HealthStatus::Inactive));

    // Back up, but still inside the stability window.
    down.remove_async().await;
    let _running_again = server
        .mock("GET", "/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status":"running"}"#)
        .create_async()
        .await;
    health.check_agent(&id).await;

    let snapshot = h.plane.status.get_agent_status_snapshot(&id, None).await.unwrap();
    assert_eq!(snapshot.state, AgentState::Inactive);
}
