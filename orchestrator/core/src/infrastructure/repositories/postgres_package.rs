// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::package::AgentPackage;
use crate::domain::repository::{PackageRepository, RepositoryError};

pub struct PostgresPackageRepository {
    pool: PgPool,
}

impl PostgresPackageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PackageRepository for PostgresPackageRepository {
    async fn list_all(&self) -> Result<Vec<AgentPackage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, configuration_required, configured FROM agent_packages ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AgentPackage, RepositoryError> {
                Ok(AgentPackage {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    configuration_required: row.try_get("configuration_required")?,
                    configured: row.try_get("configured")?,
                })
            })
            .collect()
    }
}
