// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete repository set for the configured storage backend.
//! The domain layer only sees the traits; which implementation backs them
//! is decided here.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select in-memory or PostgreSQL repositories from configuration

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::domain::config::{StorageBackendKind, StorageConfig};
use crate::domain::repository::{
    AgentRepository, ExecutionRepository, PackageRepository, WebhookRepository,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryAgentRepository, InMemoryExecutionRepository, InMemoryPackageRepository,
    InMemoryWebhookRepository, PostgresAgentRepository, PostgresExecutionRepository,
    PostgresPackageRepository, PostgresWebhookRepository,
};

/// Every store the control plane reads and writes.
#[derive(Clone)]
pub struct Repositories {
    pub agents: Arc<dyn AgentRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub webhooks: Arc<dyn WebhookRepository>,
    pub packages: Arc<dyn PackageRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            agents: Arc::new(InMemoryAgentRepository::new()),
            executions: Arc::new(InMemoryExecutionRepository::new()),
            webhooks: Arc::new(InMemoryWebhookRepository::new()),
            packages: Arc::new(InMemoryPackageRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            agents: Arc::new(PostgresAgentRepository::new(pool.clone())),
            executions: Arc::new(PostgresExecutionRepository::new(pool.clone())),
            webhooks: Arc::new(PostgresWebhookRepository::new(pool.clone())),
            packages: Arc::new(PostgresPackageRepository::new(pool)),
        }
    }

    /// Connects and migrates when the backend is PostgreSQL.
    pub async fn from_config(storage: &StorageConfig) -> Result<Self> {
        match storage.backend {
            StorageBackendKind::Memory => {
                info!("Using in-memory storage backend");
                Ok(Self::in_memory())
            }
            StorageBackendKind::Postgres => {
                let url = storage
                    .database_url
                    .as_deref()
                    .context("storage.database_url is required for the postgres backend")?;
                let db = Database::connect_and_migrate(url, storage.max_connections).await?;
                info!(max_connections = storage.max_connections, "Using PostgreSQL storage backend");
                Ok(Self::postgres(db.get_pool().clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_from_default_config() {
        let repositories = Repositories::from_config(&StorageConfig::default()).await.unwrap();
        assert!(repositories.agents.list_all().await.unwrap().is_empty());
        assert!(repositories.packages.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postgres_backend_requires_url() {
        let storage = StorageConfig {
            backend: StorageBackendKind::Postgres,
            database_url: None,
            ..Default::default()
        };
        assert!(Repositories::from_config(&storage).await.is_err());
    }
}
