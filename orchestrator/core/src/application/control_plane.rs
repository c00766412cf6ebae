// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control Plane assembly
//!
//! Builds every service from a [`ControlPlaneConfig`] and starts the
//! background loops. Nothing here is global: a process may build several
//! control planes (the integration tests do).
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Composition root for the control plane services

use anyhow::{Context, Result};
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::agents::AgentRegistryService;
use super::dashboard::DashboardService;
use super::dispatcher::{DispatcherConfig, StandardExecutionDispatcher};
use super::health_monitor::{HealthMonitor, HealthMonitorConfig};
use super::presence::{PresenceManager, PresenceManagerConfig};
use super::reaper::{ReaperConfig, StaleExecutionReaper};
use super::repository_factory::Repositories;
use super::status_manager::{StatusManager, StatusManagerConfig};
use super::webhooks::WebhookNotifier;
use super::workflow_runs::WorkflowRunService;
use crate::domain::agent_client::AgentClient;
use crate::domain::config::ControlPlaneConfig;
use crate::domain::payload::PayloadStore;
use crate::infrastructure::agent_client::HttpAgentClient;
use crate::infrastructure::event_bus::EventHub;
use crate::infrastructure::payload_store::FilePayloadStore;
use crate::infrastructure::webhook_sender::HttpWebhookSender;

pub struct ControlPlane {
    pub config: ControlPlaneConfig,
    pub events: EventHub,
    pub repositories: Repositories,
    pub status: Arc<StatusManager>,
    pub presence: Arc<PresenceManager>,
    /// `None` when HTTP health checks are disabled
    pub health: Option<Arc<HealthMonitor>>,
    pub registry: Arc<AgentRegistryService>,
    pub dispatcher: Arc<StandardExecutionDispatcher>,
    pub webhooks: Arc<WebhookNotifier>,
    pub reaper: Arc<StaleExecutionReaper>,
    pub workflows: Arc<WorkflowRunService>,
    pub dashboard: Arc<DashboardService>,
}

impl ControlPlane {
    /// Opens storage and the payload directory named by the configuration.
    pub async fn from_config(config: ControlPlaneConfig) -> Result<Self> {
        let repositories = Repositories::from_config(&config.storage).await?;
        let payloads = FilePayloadStore::new(&config.storage.payload_dir).with_context(|| {
            format!("Failed to open payload store at {:?}", config.storage.payload_dir)
        })?;
        let client = Arc::new(HttpAgentClient::new(repositories.agents.clone()));
        Ok(Self::assemble(config, repositories, Arc::new(payloads), client))
    }

    /// Wires the services over already-open stores.
    pub fn assemble(
        config: ControlPlaneConfig,
        repositories: Repositories,
        payloads: Arc<dyn PayloadStore>,
        client: Arc<dyn AgentClient>,
    ) -> Self {
        let events = EventHub::new(config.events.channel_capacity);

        let status = Arc::new(
            StatusManager::new(
                repositories.agents.clone(),
                StatusManagerConfig::from(&config.status),
            )
            .with_client(client.clone())
            .with_events(events.agents.clone()),
        );

        let presence = Arc::new(PresenceManager::new(
            status.clone(),
            PresenceManagerConfig::from(&config.presence),
        ));

        let health = config.health.enabled.then(|| {
            Arc::new(
                HealthMonitor::new(
                    client.clone(),
                    status.clone(),
                    HealthMonitorConfig::from(&config.health),
                )
                .with_presence(presence.clone())
                .with_events(events.agents.clone()),
            )
        });

        let mut registry = AgentRegistryService::new(repositories.agents.clone(), status.clone())
            .with_presence(presence.clone())
            .with_events(events.agents.clone());
        if let Some(health) = &health {
            registry = registry.with_health_monitor(health.clone());
        }

        let webhooks = Arc::new(WebhookNotifier::new(
            repositories.webhooks.clone(),
            HttpWebhookSender::new(config.webhooks.timeout),
        ));

        let dispatcher = Arc::new(
            StandardExecutionDispatcher::new(
                repositories.agents.clone(),
                repositories.executions.clone(),
                payloads,
                client,
                DispatcherConfig::from(&config.executions),
            )
            .with_status_manager(status.clone())
            .with_events(events.clone())
            .with_webhooks(webhooks.clone()),
        );

        let reaper = Arc::new(
            StaleExecutionReaper::new(
                repositories.executions.clone(),
                ReaperConfig::from(&config.executions),
            )
            .with_events(events.executions.clone())
            .with_webhooks(webhooks.clone()),
        );

        let workflows = Arc::new(WorkflowRunService::new(repositories.executions.clone()));

        let dashboard = Arc::new(
            DashboardService::new(
                repositories.agents.clone(),
                repositories.executions.clone(),
                status.clone(),
                config.dashboard.cache_ttl,
            )
            .with_packages(repositories.packages.clone()),
        );

        // A lapsed lease changes the fleet picture; do not serve it from cache.
        let expired_dashboard = dashboard.clone();
        presence.set_expire_callback(Arc::new(move |agent_id| {
            let dashboard = expired_dashboard.clone();
            async move {
                debug!(agent_id = %agent_id, "Presence expired, dropping dashboard cache");
                dashboard.invalidate();
            }
            .boxed()
        }));

        Self {
            config,
            events,
            repositories,
            status,
            presence,
            health,
            registry: Arc::new(registry),
            dispatcher,
            webhooks,
            reaper,
            workflows,
            dashboard,
        }
    }

    /// Starts the presence sweep, health poll and stale-execution reaper.
    /// All loops exit when `shutdown` is cancelled.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.presence.clone().start(shutdown.clone()),
            self.reaper.clone().start(shutdown.clone()),
        ];
        if let Some(health) = &self.health {
            handles.push(health.clone().start(shutdown.clone()));
        }
        info!(loops = handles.len(), "Control plane background loops started");
        handles
    }
}
