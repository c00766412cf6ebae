// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository contracts defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresAgentRepository** - Agent nodes and their liveness state
//! - **PostgresExecutionRepository** - Execution records, row-locked updates, stale reaping
//! - **PostgresWebhookRepository** - Webhook registrations and delivery history
//! - **PostgresPackageRepository** - Installed agent packages
//!
//! ## In-Memory Repositories
//!
//! `parking_lot`-guarded maps for development and tests. The execution store
//! holds its write lock across read-transform-write, which gives `update` and
//! `mark_stale` the same atomicity the PostgreSQL transactions provide.

pub mod postgres_agent;
pub mod postgres_execution;
pub mod postgres_package;
pub mod postgres_webhook;

pub use postgres_agent::PostgresAgentRepository;
pub use postgres_execution::PostgresExecutionRepository;
pub use postgres_package::PostgresPackageRepository;
pub use postgres_webhook::PostgresWebhookRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::agent::{AgentId, AgentNode};
use crate::domain::execution::{Execution, ExecutionFilter, ExecutionId, ExecutionStatus};
use crate::domain::package::AgentPackage;
use crate::domain::repository::{
    guard_transition, AgentRepository, ExecutionMutator, ExecutionRepository, PackageRepository,
    RepositoryError, WebhookRepository,
};
use crate::domain::webhook::{WebhookEvent, WebhookRegistration};

#[derive(Clone, Default)]
pub struct InMemoryAgentRepository {
    agents: Arc<RwLock<HashMap<AgentId, AgentNode>>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save(&self, node: &AgentNode) -> Result<(), RepositoryError> {
        self.agents.write().insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentNode>, RepositoryError> {
        Ok(self.agents.read().get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<AgentNode>, RepositoryError> {
        let mut nodes: Vec<AgentNode> = self.agents.read().values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<ExecutionId, Execution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write();
        if executions.contains_key(&execution.execution_id) {
            return Err(RepositoryError::Conflict(execution.execution_id.to_string()));
        }
        executions.insert(execution.execution_id.clone(), execution.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.read().get(id).cloned())
    }

    async fn update(
        &self,
        id: &ExecutionId,
        mutator: ExecutionMutator,
    ) -> Result<Execution, RepositoryError> {
        let mut executions = self.executions.write();
        let current = executions
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("execution {}", id)))?;

        match mutator(current.clone())? {
            Some(next) => {
                guard_transition(&current, &next)?;
                executions.insert(id.clone(), next.clone());
                Ok(next)
            }
            None => Ok(current),
        }
    }

    async fn query(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, RepositoryError> {
        let snapshot: Vec<Execution> = self.executions.read().values().cloned().collect();
        Ok(filter.apply(snapshot))
    }

    async fn mark_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut executions = self.executions.write();

        let mut candidates: Vec<(DateTime<Utc>, ExecutionId)> = executions
            .values()
            .filter(|e| ExecutionStatus::NON_TERMINAL.contains(&e.status) && e.started_at <= cutoff)
            .map(|e| (e.started_at, e.execution_id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut reaped = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(execution) = executions.get_mut(&id) {
                if execution.time_out(now).is_ok() {
                    reaped.push(execution.clone());
                }
            }
        }
        Ok(reaped)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryWebhookRepository {
    registrations: Arc<RwLock<HashMap<ExecutionId, WebhookRegistration>>>,
    events: Arc<RwLock<HashMap<ExecutionId, Vec<WebhookEvent>>>>,
}

impl InMemoryWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn register(&self, registration: &WebhookRegistration) -> Result<(), RepositoryError> {
        self.registrations
            .write()
            .insert(registration.execution_id.clone(), registration.clone());
        Ok(())
    }

    async fn find_registration(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<WebhookRegistration>, RepositoryError> {
        Ok(self.registrations.read().get(execution_id).cloned())
    }

    async fn append_event(&self, event: &WebhookEvent) -> Result<(), RepositoryError> {
        self.events
            .write()
            .entry(event.execution_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        Ok(self
            .events
            .read()
            .get(execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPackageRepository {
    packages: Arc<RwLock<Vec<AgentPackage>>>,
}

impl InMemoryPackageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, package: AgentPackage) {
        self.packages.write().push(package);
    }
}

#[async_trait]
impl PackageRepository for InMemoryPackageRepository {
    async fn list_all(&self) -> Result<Vec<AgentPackage>, RepositoryError> {
        Ok(self.packages.read().clone())
    }
}
