// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate, defined in the domain layer and
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AgentRepository` | `AgentNode` | `InMemoryAgentRepository`, `PostgresAgentRepository` |
//! | `ExecutionRepository` | `Execution` | `InMemoryExecutionRepository`, `PostgresExecutionRepository` |
//! | `WebhookRepository` | `WebhookRegistration` | `InMemoryWebhookRepository`, `PostgresWebhookRepository` |
//! | `PackageRepository` | `AgentPackage` | `InMemoryPackageRepository`, `PostgresPackageRepository` |
//!
//! Concrete implementations are selected at startup from the `storage`
//! section of the control plane configuration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::agent::{AgentId, AgentNode};
use crate::domain::execution::{
    Execution, ExecutionFilter, ExecutionId, ExecutionTransitionError,
};
use crate::domain::package::AgentPackage;
use crate::domain::webhook::{WebhookEvent, WebhookRegistration};

/// Transform applied to an execution row inside the store's transaction.
/// Returning `Ok(None)` leaves the row untouched.
pub type ExecutionMutator =
    Box<dyn FnOnce(Execution) -> Result<Option<Execution>, RepositoryError> + Send>;

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Save agent node (create or update)
    async fn save(&self, node: &AgentNode) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentNode>, RepositoryError>;

    /// All nodes, retired ones included
    async fn list_all(&self) -> Result<Vec<AgentNode>, RepositoryError>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution; fails with `Conflict` if the id is taken
    async fn create(&self, execution: &Execution) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError>;

    /// Read-transform-write under a row lock. The store rejects any result
    /// that moves a terminal row to a different status. Returns the row as
    /// stored after the call.
    async fn update(
        &self,
        id: &ExecutionId,
        mutator: ExecutionMutator,
    ) -> Result<Execution, RepositoryError>;

    async fn query(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, RepositoryError>;

    /// Times out at most `limit` non-terminal executions started at or before
    /// `cutoff`, oldest first, in a single transaction. Rows that became
    /// terminal concurrently are skipped. Returns the rows actually changed.
    async fn mark_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Execution>, RepositoryError>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    /// Create or replace the registration for an execution
    async fn register(&self, registration: &WebhookRegistration) -> Result<(), RepositoryError>;

    async fn find_registration(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<WebhookRegistration>, RepositoryError>;

    /// Append a delivery attempt to the history
    async fn append_event(&self, event: &WebhookEvent) -> Result<(), RepositoryError>;

    /// Delivery history, oldest first
    async fn list_events(&self, execution_id: &ExecutionId)
        -> Result<Vec<WebhookEvent>, RepositoryError>;
}

#[async_trait]
pub trait PackageRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<AgentPackage>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    Conflict(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] ExecutionTransitionError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Shared guard applied by every `ExecutionRepository::update` implementation.
/// A terminal row keeps its status and every stored field.
pub(crate) fn guard_transition(
    current: &Execution,
    next: &Execution,
) -> Result<(), RepositoryError> {
    if !current.status.is_terminal() {
        return Ok(());
    }
    if next.status != current.status {
        return Err(ExecutionTransitionError::AlreadyTerminal {
            execution_id: current.execution_id.clone(),
            from: current.status,
            to: next.status,
        }
        .into());
    }

    // Enrichment and the touch timestamp are not part of the outcome.
    let mut outcome = next.clone();
    outcome.updated_at = current.updated_at;
    outcome.webhook_registered = current.webhook_registered;
    outcome.webhook_events = current.webhook_events.clone();
    if outcome != *current {
        return Err(ExecutionTransitionError::Sealed {
            execution_id: current.execution_id.clone(),
            status: current.status,
        }
        .into());
    }
    Ok(())
}
