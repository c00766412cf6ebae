// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Execution Dispatcher
//!
//! Runs `agent.function` targets synchronously or asynchronously and owns the
//! execution record for the whole call:
//!
//! 1. resolve the target against the agent store and the status snapshot
//!    (no side effects on failure)
//! 2. persist the input payload
//! 3. create the execution row (`running` for sync, `pending` for async)
//! 4. invoke the agent, bounded by the execution timeout
//! 5. persist the result payload and complete the row in one store mutation
//!
//! A downstream failure, including an agent that does not answer in time,
//! completes the execution as `failed` and is never surfaced as a dispatch
//! error. `timeout` is left to the stale-execution reaper.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Execution lifecycle from request to terminal status

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::status_manager::{StatusError, StatusManager};
use super::webhooks::{self, WebhookError, WebhookNotifier};
use crate::domain::agent::{AgentId, AgentNode, HealthStatus, TargetKind};
use crate::domain::agent_client::{AgentClient, AgentClientError, InvocationContext};
use crate::domain::config::ExecutionsConfig;
use crate::domain::events::{ExecutionEvent, WorkflowRunEvent};
use crate::domain::execution::{Execution, ExecutionId, ExecutionStatus, RunId};
use crate::domain::payload::{PayloadError, PayloadStore};
use crate::domain::repository::{AgentRepository, ExecutionRepository, RepositoryError};
use crate::domain::webhook::{WebhookEvent, WebhookRegistration};
use crate::infrastructure::event_bus::EventHub;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid target '{0}': expected <agent>.<function>")]
    InvalidTarget(String),

    #[error("Agent {agent_id} is unavailable: {reason}")]
    AgentUnavailable { agent_id: AgentId, reason: String },

    #[error("Webhooks are not enabled")]
    WebhooksDisabled,

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

impl From<StatusError> for DispatchError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::NotFound(agent_id) => DispatchError::NotFound(format!("agent {}", agent_id)),
            StatusError::Repository(e) => DispatchError::Repository(e),
        }
    }
}

/// Webhook to register together with a new execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookSpec {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    pub run_id: Option<RunId>,
    pub parent_execution_id: Option<ExecutionId>,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
    pub webhook: Option<WebhookSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub execution_id: ExecutionId,
    pub run_id: RunId,
    pub node_id: AgentId,
    #[serde(rename = "type")]
    pub target_type: TargetKind,
    pub status: ExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncExecuteResponse {
    pub execution_id: ExecutionId,
    pub run_id: RunId,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatusView {
    pub execution_id: ExecutionId,
    pub run_id: RunId,
    pub status: ExecutionStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub webhook_registered: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_events: Vec<WebhookEvent>,
}

/// Entry of a batch status lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchStatusEntry {
    Found(Box<ExecutionStatusView>),
    NotFound { status: &'static str },
}

impl BatchStatusEntry {
    pub fn status(&self) -> &str {
        match self {
            BatchStatusEntry::Found(view) => view.status.as_str(),
            BatchStatusEntry::NotFound { status } => status,
        }
    }
}

#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    /// Runs the target and waits for its terminal status.
    async fn execute(
        &self,
        target: &str,
        input: serde_json::Value,
        options: ExecuteOptions,
    ) -> Result<ExecuteResponse, DispatchError>;

    /// Records the execution as `pending` and returns at once.
    async fn execute_async(
        &self,
        target: &str,
        input: serde_json::Value,
        options: ExecuteOptions,
    ) -> Result<AsyncExecuteResponse, DispatchError>;

    async fn get_execution_status(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionStatusView, DispatchError>;

    async fn batch_execution_status(
        &self,
        execution_ids: &[ExecutionId],
    ) -> Result<BTreeMap<ExecutionId, BatchStatusEntry>, DispatchError>;

    async fn register_webhook(
        &self,
        execution_id: &ExecutionId,
        webhook: WebhookSpec,
    ) -> Result<WebhookRegistration, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub execution_timeout: Duration,
}

impl From<&ExecutionsConfig> for DispatcherConfig {
    fn from(config: &ExecutionsConfig) -> Self {
        Self {
            execution_timeout: config.execution_timeout,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&ExecutionsConfig::default())
    }
}

struct Inner {
    agents: Arc<dyn AgentRepository>,
    executions: Arc<dyn ExecutionRepository>,
    payloads: Arc<dyn PayloadStore>,
    client: Arc<dyn AgentClient>,
    status: Option<Arc<StatusManager>>,
    events: Option<EventHub>,
    webhooks: Option<Arc<WebhookNotifier>>,
    config: DispatcherConfig,
}

/// A resolved target ready to be invoked.
struct Dispatch {
    node: AgentNode,
    kind: TargetKind,
    function: String,
    input: serde_json::Value,
}

pub struct StandardExecutionDispatcher {
    inner: Arc<Inner>,
}

impl StandardExecutionDispatcher {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        executions: Arc<dyn ExecutionRepository>,
        payloads: Arc<dyn PayloadStore>,
        client: Arc<dyn AgentClient>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agents,
                executions,
                payloads,
                client,
                status: None,
                events: None,
                webhooks: None,
                config,
            }),
        }
    }

    /// Gates dispatch on the agent's status snapshot. Must be called before
    /// the dispatcher is shared.
    pub fn with_status_manager(mut self, status: Arc<StatusManager>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.status = Some(status);
        }
        self
    }

    /// Must be called before the dispatcher is shared.
    pub fn with_events(mut self, events: EventHub) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.events = Some(events);
        }
        self
    }

    /// Must be called before the dispatcher is shared.
    pub fn with_webhooks(mut self, webhooks: Arc<WebhookNotifier>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.webhooks = Some(webhooks);
        }
        self
    }
}

/// Splits `agent.function` at the first dot.
pub fn parse_target(target: &str) -> Result<(AgentId, &str), DispatchError> {
    match target.split_once('.') {
        Some((agent, function)) if !agent.is_empty() && !function.is_empty() => {
            Ok((AgentId::from(agent), function))
        }
        _ => Err(DispatchError::InvalidTarget(target.to_string())),
    }
}

impl Inner {
    async fn resolve(&self, target: &str) -> Result<(AgentNode, TargetKind, String), DispatchError> {
        let (agent_id, function) = parse_target(target)?;
        let node = self
            .agents
            .find_by_id(&agent_id)
            .await?
            .filter(|node| !node.is_retired())
            .ok_or_else(|| DispatchError::NotFound(format!("agent {}", agent_id)))?;
        let kind = node
            .resolve_target(function)
            .ok_or_else(|| DispatchError::NotFound(format!("target {}", target)))?;

        if let Some(status) = &self.status {
            let snapshot = status.get_agent_status_snapshot(&agent_id, Some(&node)).await?;
            if snapshot.health_status == HealthStatus::Inactive {
                return Err(DispatchError::AgentUnavailable {
                    agent_id,
                    reason: snapshot
                        .reason
                        .unwrap_or_else(|| format!("agent is {}", snapshot.state)),
                });
            }
        }
        Ok((node, kind, function.to_string()))
    }

    /// Resolves, stores the input and creates the row. Nothing is written
    /// unless the target resolves.
    async fn prepare(
        &self,
        target: &str,
        input: serde_json::Value,
        options: ExecuteOptions,
        status: ExecutionStatus,
    ) -> Result<(Execution, Dispatch), DispatchError> {
        let (node, kind, function) = self.resolve(target).await?;
        if let Some(spec) = &options.webhook {
            if self.webhooks.is_none() {
                return Err(DispatchError::WebhooksDisabled);
            }
            webhooks::validate_url(&spec.url)?;
        }
        let stored = self.payloads.save_json(&input).await?;

        let mut execution = Execution::new(
            ExecutionId::new(),
            options.run_id.unwrap_or_default(),
            node.id.clone(),
            function.clone(),
            kind,
            status,
            Utc::now(),
        );
        execution.parent_execution_id = options.parent_execution_id;
        execution.session_id = options.session_id;
        execution.actor_id = options.actor_id;
        execution.input_uri = Some(stored.uri);

        self.executions.create(&execution).await?;

        // Registered only once the row exists, and before any status is announced.
        if let (Some(spec), Some(webhooks)) = (options.webhook, &self.webhooks) {
            if let Err(e) = webhooks
                .register(execution.execution_id.clone(), &spec.url, spec.secret, spec.headers)
                .await
            {
                self.abandon(&execution, format!("webhook registration failed: {}", e)).await;
                return Err(e.into());
            }
        }
        let mode = if status == ExecutionStatus::Pending { "async" } else { "sync" };
        metrics::counter!("brain_executions_dispatched_total", "mode" => mode).increment(1);
        info!(
            execution_id = %execution.execution_id,
            run_id = %execution.run_id,
            target = %target,
            "Execution created"
        );

        if execution.parent_execution_id.is_none() {
            if let Some(events) = &self.events {
                events.runs.publish(WorkflowRunEvent::RunStarted {
                    run_id: execution.run_id.clone(),
                    root_execution_id: execution.execution_id.clone(),
                    at: execution.started_at,
                });
            }
        }
        self.announce(&execution);

        Ok((
            execution,
            Dispatch {
                node,
                kind,
                function,
                input,
            },
        ))
    }

    /// Fails a freshly created row that will never be invoked.
    async fn abandon(&self, execution: &Execution, message: String) {
        let completed_at = Utc::now();
        let result = self
            .executions
            .update(
                &execution.execution_id,
                Box::new(move |mut current: Execution| -> Result<Option<Execution>, RepositoryError> {
                    current.complete(ExecutionStatus::Failed, completed_at, None, Some(message))?;
                    Ok(Some(current))
                }),
            )
            .await;
        if let Err(e) = result {
            warn!(execution_id = %execution.execution_id, error = %e, "Failed to abandon execution");
        }
    }

    /// Publishes the execution's current status and schedules its webhook.
    fn announce(&self, execution: &Execution) {
        if let Some(events) = &self.events {
            events.executions.publish(ExecutionEvent::from_execution(execution));
        }
        if let Some(webhooks) = &self.webhooks {
            webhooks.notify(execution.clone());
        }
    }

    async fn complete(
        &self,
        execution: Execution,
        dispatch: Dispatch,
    ) -> Result<(Execution, Option<serde_json::Value>), DispatchError> {
        let context = InvocationContext {
            run_id: execution.run_id.clone(),
            execution_id: execution.execution_id.clone(),
            parent_execution_id: execution.parent_execution_id.clone(),
            session_id: execution.session_id.clone(),
            actor_id: execution.actor_id.clone(),
        };
        let timeout = self.config.execution_timeout;

        let invocation = tokio::time::timeout(
            timeout,
            self.client.invoke(
                &dispatch.node,
                dispatch.kind,
                &dispatch.function,
                &dispatch.input,
                &context,
                timeout,
            ),
        )
        .await
        .unwrap_or(Err(AgentClientError::Timeout(timeout)));

        let (status, result, result_uri, error_message) = match invocation {
            Ok(value) => match self.payloads.save_json(&value).await {
                Ok(stored) => (ExecutionStatus::Succeeded, Some(value), Some(stored.uri), None),
                Err(e) => (
                    ExecutionStatus::Failed,
                    None,
                    None,
                    Some(format!("failed to store result: {}", e)),
                ),
            },
            Err(AgentClientError::Timeout(after)) => (
                ExecutionStatus::Failed,
                None,
                None,
                Some(format!("agent call timed out after {:?}", after)),
            ),
            Err(e) => (ExecutionStatus::Failed, None, None, Some(e.to_string())),
        };

        let completed_at = Utc::now();
        let update = self
            .executions
            .update(
                &execution.execution_id,
                Box::new(move |mut current: Execution| -> Result<Option<Execution>, RepositoryError> {
                    current.complete(status, completed_at, result_uri, error_message)?;
                    Ok(Some(current))
                }),
            )
            .await;

        let finished = match update {
            Ok(finished) => finished,
            Err(RepositoryError::InvalidTransition(e)) => {
                // The reaper got there first; its outcome stands.
                warn!(execution_id = %execution.execution_id, error = %e, "Execution already terminal");
                let current = self
                    .executions
                    .find_by_id(&execution.execution_id)
                    .await?
                    .ok_or_else(|| DispatchError::NotFound(format!("execution {}", execution.execution_id)))?;
                return Ok((current, None));
            }
            Err(e) => return Err(e.into()),
        };

        metrics::counter!("brain_execution_outcomes_total", "status" => finished.status.as_str()).increment(1);
        if let Some(ms) = finished.duration_ms {
            metrics::histogram!("brain_execution_duration_seconds").record(ms as f64 / 1000.0);
        }
        info!(
            execution_id = %finished.execution_id,
            status = finished.status.as_str(),
            duration_ms = finished.duration_ms,
            "Execution finished"
        );

        self.announce(&finished);
        if finished.parent_execution_id.is_none() {
            if let Some(events) = &self.events {
                events.runs.publish(WorkflowRunEvent::RunFinished {
                    run_id: finished.run_id.clone(),
                    root_execution_id: finished.execution_id.clone(),
                    status: finished.status,
                    at: completed_at,
                });
            }
        }
        Ok((finished, result))
    }

    /// Background half of an async dispatch: `pending -> running -> terminal`.
    async fn run_async(&self, execution: Execution, dispatch: Dispatch) {
        let started = self
            .executions
            .update(
                &execution.execution_id,
                Box::new(|mut current: Execution| -> Result<Option<Execution>, RepositoryError> {
                    if current.status.is_terminal() {
                        return Ok(None);
                    }
                    current.transition(ExecutionStatus::Running, Utc::now())?;
                    Ok(Some(current))
                }),
            )
            .await;

        let running = match started {
            Ok(running) if running.status == ExecutionStatus::Running => running,
            Ok(other) => {
                debug!(execution_id = %other.execution_id, status = other.status.as_str(), "Execution ended before start");
                return;
            }
            Err(e) => {
                warn!(execution_id = %execution.execution_id, error = %e, "Failed to start async execution");
                return;
            }
        };
        self.announce(&running);

        if let Err(e) = self.complete(running, dispatch).await {
            warn!(execution_id = %execution.execution_id, error = %e, "Failed to complete async execution");
        }
    }

    async fn status_view(&self, mut execution: Execution) -> ExecutionStatusView {
        if let Some(webhooks) = &self.webhooks {
            webhooks.enrich(&mut execution).await;
        }

        let result = match &execution.result_uri {
            Some(uri) => match self.payloads.read_json(uri).await {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(execution_id = %execution.execution_id, error = %e, "Result payload unavailable");
                    None
                }
            },
            None => None,
        };

        ExecutionStatusView {
            execution_id: execution.execution_id,
            run_id: execution.run_id,
            status: execution.status,
            result,
            error_message: execution.error_message,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            duration_ms: execution.duration_ms,
            webhook_registered: execution.webhook_registered,
            webhook_events: execution.webhook_events,
        }
    }
}

#[async_trait]
impl ExecutionDispatcher for StandardExecutionDispatcher {
    async fn execute(
        &self,
        target: &str,
        input: serde_json::Value,
        options: ExecuteOptions,
    ) -> Result<ExecuteResponse, DispatchError> {
        let (execution, dispatch) = self
            .inner
            .prepare(target, input, options, ExecutionStatus::Running)
            .await?;
        let (finished, result) = self.inner.complete(execution, dispatch).await?;

        Ok(ExecuteResponse {
            execution_id: finished.execution_id,
            run_id: finished.run_id,
            node_id: finished.agent_node_id,
            target_type: finished.target_kind,
            status: finished.status,
            result,
            error_message: finished.error_message,
            duration_ms: finished.duration_ms,
            finished_at: finished.completed_at,
        })
    }

    async fn execute_async(
        &self,
        target: &str,
        input: serde_json::Value,
        options: ExecuteOptions,
    ) -> Result<AsyncExecuteResponse, DispatchError> {
        let (execution, dispatch) = self
            .inner
            .prepare(target, input, options, ExecutionStatus::Pending)
            .await?;

        let response = AsyncExecuteResponse {
            execution_id: execution.execution_id.clone(),
            run_id: execution.run_id.clone(),
            status: execution.status,
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_async(execution, dispatch).await;
        });
        Ok(response)
    }

    async fn get_execution_status(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionStatusView, DispatchError> {
        let execution = self
            .inner
            .executions
            .find_by_id(execution_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("execution {}", execution_id)))?;
        Ok(self.inner.status_view(execution).await)
    }

    async fn batch_execution_status(
        &self,
        execution_ids: &[ExecutionId],
    ) -> Result<BTreeMap<ExecutionId, BatchStatusEntry>, DispatchError> {
        let lookups = join_all(execution_ids.iter().map(|id| async move {
            let found = self.inner.executions.find_by_id(id).await?;
            let entry = match found {
                Some(execution) => BatchStatusEntry::Found(Box::new(self.inner.status_view(execution).await)),
                None => BatchStatusEntry::NotFound { status: "not_found" },
            };
            Ok::<_, RepositoryError>((id.clone(), entry))
        }))
        .await;

        let mut statuses = BTreeMap::new();
        for lookup in lookups {
            let (id, entry) = lookup?;
            statuses.insert(id, entry);
        }
        Ok(statuses)
    }

    async fn register_webhook(
        &self,
        execution_id: &ExecutionId,
        webhook: WebhookSpec,
    ) -> Result<WebhookRegistration, DispatchError> {
        let webhooks = self.inner.webhooks.as_ref().ok_or(DispatchError::WebhooksDisabled)?;
        if self.inner.executions.find_by_id(execution_id).await?.is_none() {
            return Err(DispatchError::NotFound(format!("execution {}", execution_id)));
        }
        Ok(webhooks
            .register(execution_id.clone(), &webhook.url, webhook.secret, webhook.headers)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent_client::AgentStatusReport;
    use crate::domain::execution::ExecutionFilter;
    use crate::domain::mcp::McpHealthSummary;
    use super::super::status_manager::StatusManagerConfig;
    use crate::domain::agent::{AgentState, AgentStatusUpdate, StatusSource};
    use crate::domain::repository::WebhookRepository;
    use crate::domain::webhook::WebhookEvent;
    use crate::infrastructure::payload_store::FilePayloadStore;
    use crate::infrastructure::repositories::{InMemoryAgentRepository, InMemoryExecutionRepository};
    use crate::infrastructure::webhook_sender::HttpWebhookSender;
    use serde_json::json;

    enum Behaviour {
        Answer(serde_json::Value),
        Fail(&'static str),
        Hang,
    }

    struct StubClient {
        behaviour: Behaviour,
    }

    #[async_trait]
    impl AgentClient for StubClient {
        async fn get_agent_status(
            &self,
            _agent_id: &AgentId,
            _timeout: Duration,
        ) -> Result<AgentStatusReport, AgentClientError> {
            Ok(AgentStatusReport {
                status: "running".into(),
                uptime: None,
            })
        }

        async fn get_mcp_health(
            &self,
            _agent_id: &AgentId,
            _timeout: Duration,
        ) -> Result<McpHealthSummary, AgentClientError> {
            Ok(McpHealthSummary::default())
        }

        async fn invoke(
            &self,
            _node: &AgentNode,
            _kind: TargetKind,
            _function: &str,
            _input: &serde_json::Value,
            _context: &InvocationContext,
            _timeout: Duration,
        ) -> Result<serde_json::Value, AgentClientError> {
            match &self.behaviour {
                Behaviour::Answer(value) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(value.clone())
                }
                Behaviour::Fail(message) => Err(AgentClientError::Unreachable(message.to_string())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(json!(null))
                }
            }
        }
    }

    /// Webhook store whose writes always fail.
    struct BrokenWebhookStore;

    #[async_trait]
    impl WebhookRepository for BrokenWebhookStore {
        async fn register(&self, _registration: &WebhookRegistration) -> Result<(), RepositoryError> {
            Err(RepositoryError::Database("connection reset".into()))
        }

        async fn find_registration(
            &self,
            _execution_id: &ExecutionId,
        ) -> Result<Option<WebhookRegistration>, RepositoryError> {
            Ok(None)
        }

        async fn append_event(&self, _event: &WebhookEvent) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn list_events(&self, _execution_id: &ExecutionId) -> Result<Vec<WebhookEvent>, RepositoryError> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        dispatcher: StandardExecutionDispatcher,
        agents: Arc<InMemoryAgentRepository>,
        executions: Arc<InMemoryExecutionRepository>,
        payloads: Arc<FilePayloadStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(behaviour: Behaviour, timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let agents = Arc::new(InMemoryAgentRepository::new());
        agents
            .save(
                &AgentNode::new(AgentId::from("node-1"), "team", "http://agent", "1.0.0")
                    .with_reasoners(["reasoner-a"])
                    .with_skills(["skill-b"]),
            )
            .await
            .unwrap();
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let payloads = Arc::new(FilePayloadStore::new(dir.path()).unwrap());

        let dispatcher = StandardExecutionDispatcher::new(
            agents.clone(),
            executions.clone(),
            payloads.clone(),
            Arc::new(StubClient { behaviour }),
            DispatcherConfig {
                execution_timeout: timeout,
            },
        );
        Fixture {
            dispatcher,
            agents,
            executions,
            payloads,
            _dir: dir,
        }
    }

    #[test]
    fn test_parse_target() {
        let (agent, function) = parse_target("node-1.reasoner.v2").unwrap();
        assert_eq!(agent.as_str(), "node-1");
        assert_eq!(function, "reasoner.v2");
        assert!(matches!(parse_target("node-1"), Err(DispatchError::InvalidTarget(_))));
        assert!(matches!(parse_target(".x"), Err(DispatchError::InvalidTarget(_))));
    }

    #[tokio::test]
    async fn test_sync_success_stores_input_and_result() {
        let f = fixture(Behaviour::Answer(json!({"answer": 42})), Duration::from_secs(5)).await;

        let response = f
            .dispatcher
            .execute("node-1.reasoner-a", json!({"foo": "bar"}), ExecuteOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, ExecutionStatus::Succeeded);
        assert_eq!(response.result, Some(json!({"answer": 42})));
        assert_eq!(response.target_type, TargetKind::Reasoner);
        assert!(response.duration_ms.unwrap() >= 0);

        let stored = f.executions.find_by_id(&response.execution_id).await.unwrap().unwrap();
        let input = f.payloads.read_json(stored.input_uri.as_deref().unwrap()).await.unwrap();
        assert_eq!(input, json!({"foo": "bar"}));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_downstream_failure_is_a_failed_execution() {
        let f = fixture(Behaviour::Fail("boom"), Duration::from_secs(5)).await;

        let response = f
            .dispatcher
            .execute("node-1.skill-b", json!({}), ExecuteOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, ExecutionStatus::Failed);
        assert!(response.error_message.unwrap().contains("boom"));
        assert_eq!(response.target_type, TargetKind::Skill);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_agent_fails_the_execution() {
        let f = fixture(Behaviour::Hang, Duration::from_secs(1)).await;

        let response = f
            .dispatcher
            .execute("node-1.reasoner-a", json!({}), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status, ExecutionStatus::Failed);
        assert!(response.error_message.unwrap().contains("timed out after 1s"));
    }

    #[tokio::test]
    async fn test_unknown_target_has_no_side_effects() {
        let f = fixture(Behaviour::Answer(json!({})), Duration::from_secs(5)).await;

        for target in ["node-1.unknown", "ghost.reasoner-a"] {
            let err = f
                .dispatcher
                .execute(target, json!({}), ExecuteOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, DispatchError::NotFound(_)));
        }
        assert!(f.executions.query(&ExecutionFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_async_then_poll() {
        let f = fixture(Behaviour::Answer(json!({"answer": 42})), Duration::from_secs(5)).await;

        let accepted = f
            .dispatcher
            .execute_async("node-1.reasoner-a", json!({"abc": 123}), ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(accepted.status, ExecutionStatus::Pending);

        let mut view = f.dispatcher.get_execution_status(&accepted.execution_id).await.unwrap();
        for _ in 0..100 {
            if view.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            view = f.dispatcher.get_execution_status(&accepted.execution_id).await.unwrap();
        }
        assert_eq!(view.status, ExecutionStatus::Succeeded);
        assert_eq!(view.result, Some(json!({"answer": 42})));
        assert!(!view.webhook_registered);
    }

    #[tokio::test]
    async fn test_batch_status_reports_missing_ids() {
        let f = fixture(Behaviour::Answer(json!({"ok": true})), Duration::from_secs(5)).await;
        let done = f
            .dispatcher
            .execute("node-1.reasoner-a", json!({}), ExecuteOptions::default())
            .await
            .unwrap();

        let missing = ExecutionId::from("exec-missing");
        let batch = f
            .dispatcher
            .batch_execution_status(&[done.execution_id.clone(), missing.clone()])
            .await
            .unwrap();

        assert_eq!(batch[&done.execution_id].status(), "succeeded");
        assert_eq!(batch[&missing].status(), "not_found");
    }

    #[tokio::test]
    async fn test_webhook_requires_notifier() {
        let f = fixture(Behaviour::Answer(json!({})), Duration::from_secs(5)).await;
        let options = ExecuteOptions {
            webhook: Some(WebhookSpec {
                url: "http://localhost/hook".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = f
            .dispatcher
            .execute("node-1.reasoner-a", json!({}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WebhooksDisabled));
    }

    #[tokio::test]
    async fn test_inactive_agent_is_refused_without_side_effects() {
        let f = fixture(Behaviour::Answer(json!({})), Duration::from_secs(5)).await;
        let status = Arc::new(StatusManager::new(f.agents.clone(), StatusManagerConfig::default()));
        let dispatcher = StandardExecutionDispatcher::new(
            f.agents.clone(),
            f.executions.clone(),
            f.payloads.clone(),
            Arc::new(StubClient {
                behaviour: Behaviour::Answer(json!({})),
            }),
            DispatcherConfig::default(),
        )
        .with_status_manager(status.clone());

        // A starting agent is dispatchable.
        dispatcher
            .execute("node-1.reasoner-a", json!({}), ExecuteOptions::default())
            .await
            .unwrap();

        status
            .update_agent_status(
                &AgentId::from("node-1"),
                AgentStatusUpdate::new(StatusSource::Presence)
                    .with_state(AgentState::Inactive)
                    .with_score(0)
                    .with_reason("presence lease expired"),
            )
            .await
            .unwrap();

        let err = dispatcher
            .execute("node-1.reasoner-a", json!({}), ExecuteOptions::default())
            .await
            .unwrap_err();
        match err {
            DispatchError::AgentUnavailable { agent_id, reason } => {
                assert_eq!(agent_id.as_str(), "node-1");
                assert_eq!(reason, "presence lease expired");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.executions.query(&ExecutionFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_webhook_url_has_no_side_effects() {
        let f = fixture(Behaviour::Answer(json!({})), Duration::from_secs(5)).await;
        let dispatcher = StandardExecutionDispatcher::new(
            f.agents.clone(),
            f.executions.clone(),
            f.payloads.clone(),
            Arc::new(StubClient {
                behaviour: Behaviour::Answer(json!({})),
            }),
            DispatcherConfig::default(),
        )
        .with_webhooks(Arc::new(WebhookNotifier::new(
            Arc::new(crate::infrastructure::repositories::InMemoryWebhookRepository::new()),
            HttpWebhookSender::new(Duration::from_secs(1)),
        )));

        let options = ExecuteOptions {
            webhook: Some(WebhookSpec {
                url: "ftp://example.com/hook".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = dispatcher
            .execute("node-1.reasoner-a", json!({}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Webhook(WebhookError::InvalidUrl(_))));
        assert!(f.executions.query(&ExecutionFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_webhook_registration_fails_the_new_row() {
        let f = fixture(Behaviour::Answer(json!({})), Duration::from_secs(5)).await;
        let dispatcher = StandardExecutionDispatcher::new(
            f.agents.clone(),
            f.executions.clone(),
            f.payloads.clone(),
            Arc::new(StubClient {
                behaviour: Behaviour::Answer(json!({})),
            }),
            DispatcherConfig::default(),
        )
        .with_webhooks(Arc::new(WebhookNotifier::new(
            Arc::new(BrokenWebhookStore),
            HttpWebhookSender::new(Duration::from_secs(1)),
        )));

        let options = ExecuteOptions {
            webhook: Some(WebhookSpec {
                url: "http://localhost/hook".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = dispatcher
            .execute_async("node-1.reasoner-a", json!({}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Webhook(WebhookError::Repository(_))));

        let rows = f.executions.query(&ExecutionFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ExecutionStatus::Failed);
        assert!(rows[0]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("webhook registration failed"));
    }
}
