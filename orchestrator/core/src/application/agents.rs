// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Registry Service
//!
//! Entry point for agent-originated calls: registration, heartbeats and
//! unregistration. Each call fans out to the durable store, the status
//! manager, the presence manager and the health monitor.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drive liveness tracking from agent lifecycle calls

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use super::health_monitor::HealthMonitor;
use super::presence::PresenceManager;
use super::status_manager::{StatusError, StatusManager};
use crate::domain::agent::{
    AgentId, AgentNode, AgentState, AgentStatusSnapshot, AgentStatusUpdate, StatusSource,
    HEARTBEAT_SCORE,
};
use crate::domain::events::AgentEvent;
use crate::domain::repository::AgentRepository;
use crate::infrastructure::event_bus::EventBus;

pub const UNREGISTER_REASON: &str = "agent unregistered";

pub struct AgentRegistryService {
    agents: Arc<dyn AgentRepository>,
    status: Arc<StatusManager>,
    presence: Option<Arc<PresenceManager>>,
    health: Option<Arc<HealthMonitor>>,
    events: Option<EventBus<AgentEvent>>,
}

impl AgentRegistryService {
    pub fn new(agents: Arc<dyn AgentRepository>, status: Arc<StatusManager>) -> Self {
        Self {
            agents,
            status,
            presence: None,
            health: None,
            events: None,
        }
    }

    pub fn with_presence(mut self, presence: Arc<PresenceManager>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn with_health_monitor(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_events(mut self, events: EventBus<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Registers or re-registers a node. Re-registration keeps the original
    /// `registered_at` and brings a retired node back.
    pub async fn register(&self, mut node: AgentNode) -> Result<AgentNode, StatusError> {
        if let Some(existing) = self.agents.find_by_id(&node.id).await? {
            node.registered_at = existing.registered_at;
            node.last_heartbeat = existing.last_heartbeat;
        }
        node.retired_at = None;
        node.state = AgentState::Starting;
        node.health_score = 0;

        self.agents.save(&node).await?;
        self.status.invalidate(&node.id);

        if let Some(health) = &self.health {
            health.register_agent(&node.id, &node.base_url);
        } else if let Some(presence) = &self.presence {
            presence.touch(&node.id, Instant::now());
        }

        info!(
            agent_id = %node.id,
            base_url = %node.base_url,
            reasoners = node.reasoners.len(),
            skills = node.skills.len(),
            "Agent registered"
        );
        if let Some(events) = &self.events {
            events.publish(AgentEvent::AgentRegistered {
                agent_id: node.id.clone(),
                registered_at: node.registered_at,
            });
        }
        Ok(node)
    }

    /// Renews the presence lease and marks the agent active at full score.
    pub async fn heartbeat(&self, agent_id: &AgentId) -> Result<AgentStatusSnapshot, StatusError> {
        let node = self.get(agent_id).await?;
        if node.is_retired() {
            return Err(StatusError::NotFound(agent_id.clone()));
        }

        if let Some(presence) = &self.presence {
            presence.touch(agent_id, Instant::now());
        }
        self.status
            .update_agent_status(
                agent_id,
                AgentStatusUpdate::new(StatusSource::Heartbeat)
                    .with_state(AgentState::Active)
                    .with_score(HEARTBEAT_SCORE),
            )
            .await
    }

    /// Soft-retires the node. Its execution history stays addressable.
    pub async fn unregister(&self, agent_id: &AgentId) -> Result<(), StatusError> {
        self.status
            .update_agent_status(
                agent_id,
                AgentStatusUpdate::new(StatusSource::Manual)
                    .with_state(AgentState::Inactive)
                    .with_score(0)
                    .with_reason(UNREGISTER_REASON),
            )
            .await?;

        let mut node = self.get(agent_id).await?;
        let now = Utc::now();
        node.retire(now);
        self.agents.save(&node).await?;

        if let Some(health) = &self.health {
            health.unregister_agent(agent_id).await;
        }
        if let Some(presence) = &self.presence {
            presence.forget(agent_id);
        }
        self.status.invalidate(agent_id);

        info!(agent_id = %agent_id, "Agent unregistered");
        if let Some(events) = &self.events {
            events.publish(AgentEvent::AgentUnregistered {
                agent_id: agent_id.clone(),
                at: now,
            });
        }
        Ok(())
    }

    pub async fn get(&self, agent_id: &AgentId) -> Result<AgentNode, StatusError> {
        self.agents
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| StatusError::NotFound(agent_id.clone()))
    }

    pub async fn list(&self, include_retired: bool) -> Result<Vec<AgentNode>, StatusError> {
        let mut nodes = self.agents.list_all().await?;
        if !include_retired {
            nodes.retain(|node| !node.is_retired());
        }
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::presence::PresenceManagerConfig;
    use super::super::status_manager::StatusManagerConfig;
    use crate::domain::agent::LifecycleStatus;
    use crate::infrastructure::repositories::InMemoryAgentRepository;

    struct Fixture {
        service: AgentRegistryService,
        presence: Arc<PresenceManager>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryAgentRepository::new());
        let status = Arc::new(StatusManager::new(repo.clone(), StatusManagerConfig::default()));
        let presence = Arc::new(PresenceManager::new(status.clone(), PresenceManagerConfig::default()));
        let service = AgentRegistryService::new(repo, status).with_presence(presence.clone());
        Fixture { service, presence }
    }

    fn node(id: &str) -> AgentNode {
        AgentNode::new(AgentId::from(id), "team", "http://localhost:9000", "1.0.0")
            .with_reasoners(["summarize"])
    }

    #[tokio::test]
    async fn test_register_then_heartbeat() {
        let f = fixture();
        let registered = f.service.register(node("agent-a")).await.unwrap();
        assert_eq!(registered.state, AgentState::Starting);
        assert!(f.presence.has_lease(&registered.id));

        let snapshot = f.service.heartbeat(&registered.id).await.unwrap();
        assert_eq!(snapshot.state, AgentState::Active);
        assert_eq!(snapshot.health_score, HEARTBEAT_SCORE);
        assert_eq!(snapshot.lifecycle_status, LifecycleStatus::Ready);
        assert!(snapshot.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_unregister_retires_but_keeps_node() {
        let f = fixture();
        let id = f.service.register(node("agent-b")).await.unwrap().id;
        f.service.heartbeat(&id).await.unwrap();

        f.service.unregister(&id).await.unwrap();

        let stored = f.service.get(&id).await.unwrap();
        assert!(stored.is_retired());
        assert_eq!(stored.state, AgentState::Inactive);
        assert!(f.presence.lease(&id).is_none());
        assert!(f.service.list(false).await.unwrap().is_empty());
        assert_eq!(f.service.list(true).await.unwrap().len(), 1);

        assert!(matches!(f.service.heartbeat(&id).await, Err(StatusError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reregistration_revives_and_keeps_registered_at() {
        let f = fixture();
        let first = f.service.register(node("agent-c")).await.unwrap();
        f.service.unregister(&first.id).await.unwrap();

        let again = f.service.register(node("agent-c")).await.unwrap();
        assert!(!again.is_retired());
        assert_eq!(again.registered_at, first.registered_at);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent() {
        let f = fixture();
        let result = f.service.heartbeat(&AgentId::from("ghost")).await;
        assert!(matches!(result, Err(StatusError::NotFound(_))));
    }
}
