// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Status Manager
//!
//! Single source of truth for an agent's lifecycle state. Heartbeats, health
//! probes, presence expiry and manual changes all funnel through
//! [`StatusManager::update_agent_status`]; reads are served from a per-agent
//! cache with a bounded TTL.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Merge disagreeing liveness signals into one persisted state
//!
//! # Concurrency
//!
//! The cache and transition history are sharded maps, so unrelated agents
//! never contend. Updates to the same agent are serialized by a per-agent
//! async lock held across the read-modify-write of the stored node.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::agent::{
    AgentId, AgentNode, AgentState, AgentStatusSnapshot, AgentStatusUpdate, LifecycleStatus,
    StateTransition, StatusSource, PROBE_RUNNING_SCORE,
};
use crate::domain::agent_client::AgentClient;
use crate::domain::config::StatusConfig;
use crate::domain::events::AgentEvent;
use crate::domain::repository::{AgentRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("Agent not found: {0}")]
    NotFound(AgentId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone)]
pub struct StatusManagerConfig {
    pub cache_ttl: Duration,
    pub probe_timeout: Duration,
    pub transition_history: usize,
}

impl Default for StatusManagerConfig {
    fn default() -> Self {
        Self::from(&StatusConfig::default())
    }
}

impl From<&StatusConfig> for StatusManagerConfig {
    fn from(config: &StatusConfig) -> Self {
        Self {
            cache_ttl: config.cache_ttl,
            probe_timeout: config.probe_timeout,
            transition_history: config.transition_history,
        }
    }
}

struct CachedSnapshot {
    snapshot: AgentStatusSnapshot,
    cached_at: Instant,
}

pub struct StatusManager {
    agents: Arc<dyn AgentRepository>,
    client: Option<Arc<dyn AgentClient>>,
    events: Option<EventBus<AgentEvent>>,
    config: StatusManagerConfig,
    cache: DashMap<AgentId, CachedSnapshot>,
    transitions: DashMap<AgentId, VecDeque<StateTransition>>,
    update_locks: DashMap<AgentId, Arc<Mutex<()>>>,
}

impl StatusManager {
    pub fn new(agents: Arc<dyn AgentRepository>, config: StatusManagerConfig) -> Self {
        Self {
            agents,
            client: None,
            events: None,
            config,
            cache: DashMap::new(),
            transitions: DashMap::new(),
            update_locks: DashMap::new(),
        }
    }

    /// Enables active probing on cache misses.
    pub fn with_client(mut self, client: Arc<dyn AgentClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_events(mut self, events: EventBus<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current status, probing the agent when the cache entry is missing or
    /// expired and a client is configured.
    pub async fn get_agent_status(
        &self,
        agent_id: &AgentId,
    ) -> Result<AgentStatusSnapshot, StatusError> {
        if let Some(snapshot) = self.fresh_cached(agent_id) {
            return Ok(snapshot);
        }

        let node = match self.agents.find_by_id(agent_id).await {
            Ok(Some(node)) => node,
            Ok(None) => return Err(StatusError::NotFound(agent_id.clone())),
            Err(e) => return self.stale_or(agent_id, e),
        };

        match &self.client {
            Some(client) if !node.is_retired() => self.probe(client.as_ref(), node).await,
            _ => Ok(self.cache_from_node(&node)),
        }
    }

    /// Status derived from stored state without probing. A `hint` carrying
    /// the same agent id is used in place of a storage lookup.
    pub async fn get_agent_status_snapshot(
        &self,
        agent_id: &AgentId,
        hint: Option<&AgentNode>,
    ) -> Result<AgentStatusSnapshot, StatusError> {
        if let Some(snapshot) = self.fresh_cached(agent_id) {
            return Ok(snapshot);
        }

        let node = match hint {
            Some(node) if &node.id == agent_id => node.clone(),
            _ => match self.agents.find_by_id(agent_id).await {
                Ok(Some(node)) => node,
                Ok(None) => return Err(StatusError::NotFound(agent_id.clone())),
                Err(e) => return self.stale_or(agent_id, e),
            },
        };

        Ok(self.cache_from_node(&node))
    }

    /// Applies a status change. Always wins over the cache: the entry is
    /// replaced with the result of this update.
    pub async fn update_agent_status(
        &self,
        agent_id: &AgentId,
        update: AgentStatusUpdate,
    ) -> Result<AgentStatusSnapshot, StatusError> {
        let lock = self
            .update_locks
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut node = self
            .agents
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| StatusError::NotFound(agent_id.clone()))?;

        let previous_state = node.state;
        let previous_score = node.health_score;
        let previous_lifecycle = node.lifecycle_status();
        let now = Utc::now();

        if let Some(state) = update.state {
            node.state = state;
        }
        if let Some(score) = update.health_score {
            node.health_score = score;
        }
        if update.source == StatusSource::Heartbeat {
            node.last_heartbeat = Some(now);
        }

        self.agents.save(&node).await?;

        let mut snapshot = AgentStatusSnapshot::from_node(&node, update.source, update.reason.clone());
        if node.state != previous_state {
            let transition = StateTransition {
                from: previous_state,
                to: node.state,
                at: now,
                source: update.source,
                reason: update.reason.clone(),
            };
            self.record_transition(agent_id, transition.clone());
            snapshot.state_transition = Some(transition);

            info!(
                agent_id = %agent_id,
                from = %previous_state,
                to = %node.state,
                source = update.source.as_str(),
                "Agent state changed"
            );
            metrics::counter!(
                "brain_agent_state_transitions_total",
                "to" => node.state.as_str(),
                "source" => update.source.as_str()
            )
            .increment(1);
        }

        self.cache.insert(
            agent_id.clone(),
            CachedSnapshot {
                snapshot: snapshot.clone(),
                cached_at: Instant::now(),
            },
        );

        self.publish_changes(&node, previous_state, previous_score, previous_lifecycle, &update);
        Ok(snapshot)
    }

    /// Most recent transitions for an agent, oldest first.
    pub fn recent_transitions(&self, agent_id: &AgentId) -> Vec<StateTransition> {
        self.transitions
            .get(agent_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn invalidate(&self, agent_id: &AgentId) {
        self.cache.remove(agent_id);
    }

    /// Drops all in-memory state for an agent.
    pub fn forget(&self, agent_id: &AgentId) {
        self.cache.remove(agent_id);
        self.transitions.remove(agent_id);
        self.update_locks.remove(agent_id);
    }

    fn fresh_cached(&self, agent_id: &AgentId) -> Option<AgentStatusSnapshot> {
        let entry = self.cache.get(agent_id)?;
        if entry.cached_at.elapsed() < self.config.cache_ttl {
            debug!(agent_id = %agent_id, "Status cache hit");
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }

    /// Serves an expired entry marked stale when storage is unavailable.
    fn stale_or(
        &self,
        agent_id: &AgentId,
        error: RepositoryError,
    ) -> Result<AgentStatusSnapshot, StatusError> {
        match self.cache.get(agent_id) {
            Some(entry) => {
                warn!(agent_id = %agent_id, error = %error, "Serving stale agent status");
                let mut snapshot = entry.snapshot.clone();
                snapshot.stale = true;
                Ok(snapshot)
            }
            None => Err(error.into()),
        }
    }

    fn cache_from_node(&self, node: &AgentNode) -> AgentStatusSnapshot {
        let snapshot = AgentStatusSnapshot::from_node(node, StatusSource::Reconcile, None);
        self.cache.insert(
            node.id.clone(),
            CachedSnapshot {
                snapshot: snapshot.clone(),
                cached_at: Instant::now(),
            },
        );
        snapshot
    }

    async fn probe(
        &self,
        client: &dyn AgentClient,
        node: AgentNode,
    ) -> Result<AgentStatusSnapshot, StatusError> {
        let timeout = self.config.probe_timeout;
        let outcome = tokio::time::timeout(timeout, client.get_agent_status(&node.id, timeout)).await;

        let update = match outcome {
            Ok(Ok(report)) if report.is_running() => AgentStatusUpdate::new(StatusSource::Reconcile)
                .with_state(AgentState::Active)
                .with_score(PROBE_RUNNING_SCORE)
                .with_reason("status probe reports running"),
            Ok(Ok(report)) => AgentStatusUpdate::new(StatusSource::Reconcile)
                .with_state(AgentState::Inactive)
                .with_score(0)
                .with_reason(format!("status probe reports {}", report.status)),
            Ok(Err(e)) => {
                debug!(agent_id = %node.id, error = %e, "Status probe failed");
                AgentStatusUpdate::new(StatusSource::Reconcile)
                    .with_state(AgentState::Inactive)
                    .with_score(0)
                    .with_reason(format!("status probe failed: {}", e))
            }
            Err(_) => AgentStatusUpdate::new(StatusSource::Reconcile)
                .with_state(AgentState::Inactive)
                .with_score(0)
                .with_reason("status probe timed out"),
        };

        self.update_agent_status(&node.id, update).await
    }

    fn record_transition(&self, agent_id: &AgentId, transition: StateTransition) {
        let mut history = self.transitions.entry(agent_id.clone()).or_default();
        history.push_back(transition);
        while history.len() > self.config.transition_history.max(1) {
            history.pop_front();
        }
    }

    fn publish_changes(
        &self,
        node: &AgentNode,
        previous_state: AgentState,
        previous_score: u8,
        previous_lifecycle: LifecycleStatus,
        update: &AgentStatusUpdate,
    ) {
        let Some(events) = &self.events else {
            return;
        };
        let at = Utc::now();

        if node.state != previous_state {
            if node.state == AgentState::Active {
                events.publish(AgentEvent::AgentOnline {
                    agent_id: node.id.clone(),
                    source: update.source,
                    at,
                });
            } else if previous_state == AgentState::Active {
                events.publish(AgentEvent::AgentOffline {
                    agent_id: node.id.clone(),
                    source: update.source,
                    reason: update.reason.clone(),
                    at,
                });
            }
        }

        if node.health_score != previous_score || node.lifecycle_status() != previous_lifecycle {
            events.publish(AgentEvent::AgentHealthChanged {
                agent_id: node.id.clone(),
                health_score: node.health_score,
                lifecycle_status: node.lifecycle_status(),
                at,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{HealthStatus, HEARTBEAT_SCORE};
    use crate::domain::agent_client::{AgentClientError, AgentStatusReport, InvocationContext};
    use crate::domain::mcp::McpHealthSummary;
    use crate::infrastructure::repositories::InMemoryAgentRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeClient {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl AgentClient for FakeClient {
        async fn get_agent_status(
            &self,
            _agent_id: &AgentId,
            _timeout: Duration,
        ) -> Result<AgentStatusReport, AgentClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(AgentClientError::Unreachable("boom".into()))
            } else {
                Ok(AgentStatusReport {
                    status: "running".into(),
                    uptime: None,
                })
            }
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
            _kind: crate::domain::agent::TargetKind,
            _function: &str,
            _input: &serde_json::Value,
            _context: &InvocationContext,
            _timeout: Duration,
        ) -> Result<serde_json::Value, AgentClientError> {
            Ok(serde_json::Value::Null)
        }
    }

    async fn setup(id: &str) -> Arc<InMemoryAgentRepository> {
        let repo = Arc::new(InMemoryAgentRepository::new());
        let node = AgentNode::new(AgentId::from(id), "team", "http://localhost:1", "1.0.0");
        repo.save(&node).await.unwrap();
        repo
    }

    fn config(ttl_secs: u64) -> StatusManagerConfig {
        StatusManagerConfig {
            cache_ttl: Duration::from_secs(ttl_secs),
            probe_timeout: Duration::from_secs(5),
            transition_history: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_probe_until_ttl() {
        let repo = setup("node-1").await;
        let client = Arc::new(FakeClient::default());
        let manager = StatusManager::new(repo.clone(), config(1)).with_client(client.clone());
        let id = AgentId::from("node-1");

        let status = manager.get_agent_status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Active);
        assert_eq!(status.health_score, PROBE_RUNNING_SCORE);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // Within TTL a failing client is never consulted.
        client.failing.store(true, Ordering::SeqCst);
        let cached = manager.get_agent_status(&id).await.unwrap();
        assert_eq!(cached.state, AgentState::Active);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1100)).await;
        let after = manager.get_agent_status(&id).await.unwrap();
        assert_eq!(after.state, AgentState::Inactive);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        let stored = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.health_status(), HealthStatus::Inactive);
        assert_eq!(stored.health_score, 0);
    }

    #[tokio::test]
    async fn test_update_overrides_cache_and_records_transition() {
        let repo = setup("node-2").await;
        let manager = StatusManager::new(repo, config(60));
        let id = AgentId::from("node-2");

        let first = manager.get_agent_status_snapshot(&id, None).await.unwrap();
        assert_eq!(first.state, AgentState::Starting);

        let updated = manager
            .update_agent_status(
                &id,
                AgentStatusUpdate::new(StatusSource::Heartbeat)
                    .with_state(AgentState::Active)
                    .with_score(HEARTBEAT_SCORE),
            )
            .await
            .unwrap();
        assert_eq!(updated.lifecycle_status, LifecycleStatus::Ready);
        assert!(updated.last_seen.is_some());
        assert_eq!(
            updated.state_transition.as_ref().map(|t| (t.from, t.to)),
            Some((AgentState::Starting, AgentState::Active))
        );

        // The cached entry now reflects the update, not the earlier snapshot.
        let status = manager.get_agent_status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Active);
        assert_eq!(manager.recent_transitions(&id).len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_without_client_uses_storage() {
        let repo = setup("node-3").await;
        let manager = StatusManager::new(repo, config(60));

        let snapshot = manager
            .get_agent_status_snapshot(&AgentId::from("node-3"), None)
            .await
            .unwrap();
        assert_eq!(snapshot.source, StatusSource::Reconcile);
        assert_eq!(snapshot.lifecycle_status, LifecycleStatus::Starting);
    }

    #[tokio::test]
    async fn test_snapshot_hint_avoids_storage() {
        // Empty repository: only the hint can answer.
        let manager = StatusManager::new(Arc::new(InMemoryAgentRepository::new()), config(60));
        let mut node = AgentNode::new(AgentId::from("node-4"), "team", "http://localhost:1", "1.0.0");
        node.state = AgentState::Active;
        node.health_score = 90;

        let snapshot = manager
            .get_agent_status_snapshot(&node.id, Some(&node))
            .await
            .unwrap();
        assert_eq!(snapshot.lifecycle_status, LifecycleStatus::Ready);
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let manager = StatusManager::new(Arc::new(InMemoryAgentRepository::new()), config(60));
        let result = manager.get_agent_status(&AgentId::from("ghost")).await;
        assert!(matches!(result, Err(StatusError::NotFound(_))));

        let update = manager
            .update_agent_status(&AgentId::from("ghost"), AgentStatusUpdate::new(StatusSource::Manual))
            .await;
        assert!(matches!(update, Err(StatusError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transition_history_is_bounded() {
        let repo = setup("node-5").await;
        let manager = StatusManager::new(repo, config(60));
        let id = AgentId::from("node-5");

        for i in 0..6 {
            let state = if i % 2 == 0 { AgentState::Active } else { AgentState::Inactive };
            manager
                .update_agent_status(&id, AgentStatusUpdate::new(StatusSource::Manual).with_state(state))
                .await
                .unwrap();
        }

        let history = manager.recent_transitions(&id);
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().map(|t| t.to), Some(AgentState::Inactive));
    }

    #[tokio::test]
    async fn test_publishes_online_and_offline() {
        let repo = setup("node-6").await;
        let bus: EventBus<AgentEvent> = EventBus::new(16);
        let mut rx = bus.subscribe();
        let manager = StatusManager::new(repo, config(60)).with_events(bus);
        let id = AgentId::from("node-6");

        manager
            .update_agent_status(
                &id,
                AgentStatusUpdate::new(StatusSource::Heartbeat).with_state(AgentState::Active).with_score(100),
            )
            .await
            .unwrap();
        manager
            .update_agent_status(
                &id,
                AgentStatusUpdate::new(StatusSource::Presence)
                    .with_state(AgentState::Inactive)
                    .with_score(0)
                    .with_reason("presence lease expired"),
            )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                AgentEvent::AgentOnline { .. } => "online",
                AgentEvent::AgentOffline { .. } => "offline",
                AgentEvent::AgentHealthChanged { .. } => "health",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["online", "health", "offline", "health"]);
    }
}
