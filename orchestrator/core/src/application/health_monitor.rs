// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Health Monitor - active polling of registered agents
//!
//! Keeps its own registry of agents to poll, separate from the durable agent
//! store. Each cycle probes every registered agent concurrently; a result is
//! pushed to the [`StatusManager`] only when it differs from the last one
//! recorded for that agent.
//!
//! # Debounce
//!
//! Once an agent has been marked inactive, a successful probe inside the
//! stability window is ignored and the agent stays inactive. The first
//! successful probe after the window flips it back to active.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Poll-based liveness plus MCP sub-health

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::presence::PresenceManager;
use super::status_manager::StatusManager;
use crate::domain::agent::{
    AgentId, AgentState, AgentStatusUpdate, HealthStatus, StatusSource, PROBE_RUNNING_SCORE,
};
use crate::domain::agent_client::AgentClient;
use crate::domain::config::HealthConfig;
use crate::domain::events::AgentEvent;
use crate::domain::mcp::{McpHealthSummary, McpStatusView};
use crate::infrastructure::event_bus::EventBus;

pub const UNREGISTERED_REASON: &str = "agent unregistered from health monitoring";
const CHECK_REASON: &str = "HTTP health check result";

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub probe_timeout: Duration,
    pub stability_window: Duration,
}

impl From<&HealthConfig> for HealthMonitorConfig {
    fn from(config: &HealthConfig) -> Self {
        Self {
            check_interval: config.check_interval,
            probe_timeout: config.probe_timeout,
            stability_window: config.stability_window,
        }
    }
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

#[derive(Debug, Clone)]
struct ActiveAgent {
    base_url: String,
    last_status: HealthStatus,
    last_checked: Instant,
    last_inactive_at: Option<Instant>,
}

pub struct HealthMonitor {
    client: Arc<dyn AgentClient>,
    status: Arc<StatusManager>,
    presence: Option<Arc<PresenceManager>>,
    events: Option<EventBus<AgentEvent>>,
    config: HealthMonitorConfig,
    active: RwLock<HashMap<AgentId, ActiveAgent>>,
    mcp_cache: RwLock<HashMap<AgentId, McpHealthSummary>>,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<dyn AgentClient>,
        status: Arc<StatusManager>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            client,
            status,
            presence: None,
            events: None,
            config,
            active: RwLock::new(HashMap::new()),
            mcp_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_presence(mut self, presence: Arc<PresenceManager>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn with_events(mut self, events: EventBus<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Adds an agent to the polling registry and opens its presence lease.
    pub fn register_agent(&self, agent_id: &AgentId, base_url: impl Into<String>) {
        let now = Instant::now();
        self.active.write().insert(
            agent_id.clone(),
            ActiveAgent {
                base_url: base_url.into(),
                last_status: HealthStatus::Unknown,
                last_checked: now,
                last_inactive_at: None,
            },
        );
        if let Some(presence) = &self.presence {
            presence.touch(agent_id, now);
        }
        debug!(agent_id = %agent_id, "Registered agent for health monitoring");
    }

    /// Removes an agent from polling and marks it inactive. Unknown ids are
    /// ignored.
    pub async fn unregister_agent(&self, agent_id: &AgentId) {
        let removed = self.active.write().remove(agent_id);
        let Some(entry) = removed else {
            return;
        };
        self.mcp_cache.write().remove(agent_id);
        if let Some(presence) = &self.presence {
            presence.forget(agent_id);
        }

        let update = AgentStatusUpdate::new(StatusSource::HealthCheck)
            .with_state(AgentState::Inactive)
            .with_score(0)
            .with_reason(UNREGISTERED_REASON);
        if let Err(e) = self.status.update_agent_status(agent_id, update).await {
            warn!(agent_id = %agent_id, error = %e, "Failed to mark unregistered agent inactive");
        }
        debug!(agent_id = %agent_id, base_url = %entry.base_url, "Unregistered agent from health monitoring");
    }

    pub fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.active.read().contains_key(agent_id)
    }

    pub fn registered_agents(&self) -> Vec<AgentId> {
        self.active.read().keys().cloned().collect()
    }

    /// Copy of the last MCP summary seen per agent.
    pub fn mcp_health_cache(&self) -> HashMap<AgentId, McpHealthSummary> {
        self.mcp_cache.read().clone()
    }

    /// One polling cycle over every registered agent.
    pub async fn check_all(&self) {
        let agents = self.registered_agents();
        if agents.is_empty() {
            debug!("No agents to health check");
            return;
        }
        debug!(count = agents.len(), "Health checking agents");
        join_all(agents.iter().map(|id| self.check_agent(id))).await;
    }

    /// Probes one agent and applies the result. Returns the status pushed to
    /// the status manager, or `None` when nothing changed.
    pub async fn check_agent(&self, agent_id: &AgentId) -> Option<HealthStatus> {
        if !self.is_registered(agent_id) {
            return None;
        }

        let timeout = self.config.probe_timeout;
        let probed = match tokio::time::timeout(timeout, self.client.get_agent_status(agent_id, timeout)).await {
            Ok(Ok(report)) if report.is_running() => HealthStatus::Active,
            Ok(Ok(report)) => {
                debug!(agent_id = %agent_id, status = %report.status, "Agent reports not running");
                HealthStatus::Inactive
            }
            Ok(Err(e)) => {
                debug!(agent_id = %agent_id, error = %e, "Health probe failed");
                HealthStatus::Inactive
            }
            Err(_) => {
                debug!(agent_id = %agent_id, "Health probe timed out");
                HealthStatus::Inactive
            }
        };

        let changed = {
            let mut active = self.active.write();
            let entry = active.get_mut(agent_id)?;
            let now = Instant::now();
            entry.last_checked = now;
            self.apply_probe(agent_id, entry, probed, now)
        };
        if !changed {
            return None;
        }

        let update = match probed {
            HealthStatus::Active => AgentStatusUpdate::new(StatusSource::HealthCheck)
                .with_state(AgentState::Active)
                .with_score(PROBE_RUNNING_SCORE),
            _ => AgentStatusUpdate::new(StatusSource::HealthCheck)
                .with_state(AgentState::Inactive)
                .with_score(0),
        }
        .with_reason(CHECK_REASON);

        metrics::counter!("brain_health_transitions_total", "to" => health_label(probed)).increment(1);
        info!(agent_id = %agent_id, status = health_label(probed), "Agent health changed");

        match self.status.update_agent_status(agent_id, update).await {
            Ok(_) if probed == HealthStatus::Active => {
                if let Some(presence) = &self.presence {
                    presence.touch(agent_id, Instant::now());
                }
                self.check_mcp_health(agent_id).await;
            }
            Ok(_) => {}
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Failed to apply health check result"),
        }
        Some(probed)
    }

    /// Records a probe result against the registry entry. Returns true when
    /// the recorded status changed.
    fn apply_probe(
        &self,
        agent_id: &AgentId,
        entry: &mut ActiveAgent,
        probed: HealthStatus,
        now: Instant,
    ) -> bool {
        if entry.last_status == probed {
            return false;
        }
        match probed {
            HealthStatus::Active => {
                if entry.last_status == HealthStatus::Inactive {
                    if let Some(inactive_at) = entry.last_inactive_at {
                        if now.saturating_duration_since(inactive_at) < self.config.stability_window {
                            debug!(agent_id = %agent_id, "Recovery inside stability window, staying inactive");
                            return false;
                        }
                    }
                }
            }
            _ => entry.last_inactive_at = Some(now),
        }
        entry.last_status = probed;
        true
    }

    async fn check_mcp_health(&self, agent_id: &AgentId) {
        let Ok(summary) = self
            .client
            .get_mcp_health(agent_id, self.config.probe_timeout)
            .await
        else {
            return;
        };

        let changed = {
            let mut cache = self.mcp_cache.write();
            let changed = cache
                .get(agent_id)
                .map(|previous| summary.differs_from(previous))
                .unwrap_or(true);
            if changed {
                cache.insert(agent_id.clone(), summary);
            }
            changed
        };
        if !changed {
            return;
        }

        debug!(
            agent_id = %agent_id,
            running = summary.running_servers,
            total = summary.total_servers,
            health = summary.overall_health,
            "MCP health changed"
        );
        if let Some(events) = &self.events {
            events.publish(AgentEvent::McpHealthChanged {
                agent_id: agent_id.clone(),
                mcp: McpStatusView::from(summary),
                at: Utc::now(),
            });
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, shutdown: CancellationToken) {
        info!(
            check_interval = ?self.config.check_interval,
            probe_timeout = ?self.config.probe_timeout,
            "Starting health monitor"
        );

        let mut tick = interval(self.config.check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.check_all().await,
                _ = shutdown.cancelled() => {
                    info!("Health monitor shutting down");
                    break;
                }
            }
        }
    }
}

fn health_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Active => "active",
        HealthStatus::Inactive => "inactive",
        HealthStatus::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::presence::PresenceManagerConfig;
    use super::super::status_manager::StatusManagerConfig;
    use crate::domain::agent::{AgentNode, TargetKind};
    use crate::domain::agent_client::{AgentClientError, AgentStatusReport, InvocationContext};
    use crate::domain::repository::AgentRepository;
    use crate::infrastructure::repositories::InMemoryAgentRepository;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ScriptedClient {
        running: Mutex<HashMap<AgentId, bool>>,
        mcp: Mutex<Option<McpHealthSummary>>,
    }

    impl ScriptedClient {
        fn set_running(&self, id: &AgentId, running: bool) {
            self.running.lock().insert(id.clone(), running);
        }
    }

    #[async_trait]
    impl AgentClient for ScriptedClient {
        async fn get_agent_status(
            &self,
            agent_id: &AgentId,
            _timeout: Duration,
        ) -> Result<AgentStatusReport, AgentClientError> {
            match self.running.lock().get(agent_id).copied() {
                Some(true) => Ok(AgentStatusReport {
                    status: "running".into(),
                    uptime: None,
                }),
                _ => Err(AgentClientError::Unreachable("connection refused".into())),
            }
        }

        async fn get_mcp_health(
            &self,
            _agent_id: &AgentId,
            _timeout: Duration,
        ) -> Result<McpHealthSummary, AgentClientError> {
            let summary = *self.mcp.lock();
            summary.ok_or_else(|| AgentClientError::Http {
                status: 404,
                body: String::new(),
            })
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
            Ok(serde_json::Value::Null)
        }
    }

    struct Fixture {
        repo: Arc<InMemoryAgentRepository>,
        client: Arc<ScriptedClient>,
        status: Arc<StatusManager>,
        monitor: HealthMonitor,
        id: AgentId,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryAgentRepository::new());
        let node = AgentNode::new(AgentId::from("agent-a"), "team", "http://localhost:1", "1.0.0");
        repo.save(&node).await.unwrap();

        let client = Arc::new(ScriptedClient::default());
        let status = Arc::new(StatusManager::new(repo.clone(), StatusManagerConfig::default()));
        let monitor = HealthMonitor::new(client.clone(), status.clone(), HealthMonitorConfig::default());
        monitor.register_agent(&node.id, &node.base_url);

        Fixture {
            repo,
            client,
            status,
            monitor,
            id: node.id,
        }
    }

    async fn stored_state(f: &Fixture) -> AgentState {
        f.repo.find_by_id(&f.id).await.unwrap().unwrap().state
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_holds_inactive_inside_window() {
        let f = fixture().await;

        f.client.set_running(&f.id, true);
        assert_eq!(f.monitor.check_agent(&f.id).await, Some(HealthStatus::Active));
        assert_eq!(stored_state(&f).await, AgentState::Active);

        f.client.set_running(&f.id, false);
        assert_eq!(f.monitor.check_agent(&f.id).await, Some(HealthStatus::Inactive));
        assert_eq!(stored_state(&f).await, AgentState::Inactive);

        f.client.set_running(&f.id, true);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(f.monitor.check_agent(&f.id).await, None);
        assert_eq!(stored_state(&f).await, AgentState::Inactive);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(f.monitor.check_agent(&f.id).await, Some(HealthStatus::Active));
        assert_eq!(stored_state(&f).await, AgentState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_only_on_change() {
        let f = fixture().await;
        f.client.set_running(&f.id, true);

        for _ in 0..3 {
            f.monitor.check_all().await;
        }
        assert_eq!(f.status.recent_transitions(&f.id).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mcp_change_published_once() {
        let f = fixture().await;
        let bus: EventBus<AgentEvent> = EventBus::new(16);
        let mut rx = bus.subscribe();
        let monitor = HealthMonitor::new(f.client.clone(), f.status.clone(), HealthMonitorConfig::default())
            .with_events(bus);
        monitor.register_agent(&f.id, "http://localhost:1");

        *f.client.mcp.lock() = Some(McpHealthSummary {
            total_servers: 2,
            running_servers: 2,
            total_tools: 5,
            overall_health: 1.0,
        });
        f.client.set_running(&f.id, true);
        monitor.check_agent(&f.id).await;

        // Flap so the monitor re-checks MCP with identical figures.
        f.client.set_running(&f.id, false);
        monitor.check_agent(&f.id).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        f.client.set_running(&f.id, true);
        monitor.check_agent(&f.id).await;

        let mut mcp_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AgentEvent::McpHealthChanged { .. }) {
                mcp_events += 1;
            }
        }
        assert_eq!(mcp_events, 1);
        assert_eq!(monitor.mcp_health_cache().get(&f.id).map(|s| s.total_tools), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_marks_inactive_and_drops_lease() {
        let repo = Arc::new(InMemoryAgentRepository::new());
        let mut node = AgentNode::new(AgentId::from("agent-b"), "team", "http://localhost:1", "1.0.0");
        node.state = AgentState::Active;
        node.health_score = 100;
        repo.save(&node).await.unwrap();

        let status = Arc::new(StatusManager::new(repo.clone(), StatusManagerConfig::default()));
        let presence = Arc::new(PresenceManager::new(status.clone(), PresenceManagerConfig::default()));
        let monitor = HealthMonitor::new(Arc::new(ScriptedClient::default()), status, HealthMonitorConfig::default())
            .with_presence(presence.clone());

        monitor.register_agent(&node.id, &node.base_url);
        assert!(presence.has_lease(&node.id));

        monitor.unregister_agent(&node.id).await;
        assert!(!monitor.is_registered(&node.id));
        assert!(presence.lease(&node.id).is_none());
        assert_eq!(repo.find_by_id(&node.id).await.unwrap().unwrap().state, AgentState::Inactive);
    }
}
