// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Agent Repository
//!
//! `AgentRepository` backed by the `agent_nodes` table. Declared reasoners and
//! skills are stored as JSONB arrays.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::agent::{AgentId, AgentNode};
use crate::domain::repository::{AgentRepository, RepositoryError};

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &PgRow) -> Result<AgentNode, RepositoryError> {
        let state: String = row.try_get("state")?;
        let reasoners: serde_json::Value = row.try_get("reasoners")?;
        let skills: serde_json::Value = row.try_get("skills")?;
        let health_score: i16 = row.try_get("health_score")?;

        Ok(AgentNode {
            id: AgentId(row.try_get("id")?),
            team_id: row.try_get("team_id")?,
            version: row.try_get("version")?,
            base_url: row.try_get("base_url")?,
            reasoners: serde_json::from_value(reasoners)?,
            skills: serde_json::from_value(skills)?,
            state: state.parse().map_err(RepositoryError::Serialization)?,
            health_score: health_score.clamp(0, 100) as u8,
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
            retired_at: row.try_get("retired_at")?,
        })
    }
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn save(&self, node: &AgentNode) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO agent_nodes (
                id, team_id, version, base_url, reasoners, skills,
                state, health_score, last_heartbeat, registered_at, retired_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                team_id = EXCLUDED.team_id,
                version = EXCLUDED.version,
                base_url = EXCLUDED.base_url,
                reasoners = EXCLUDED.reasoners,
                skills = EXCLUDED.skills,
                state = EXCLUDED.state,
                health_score = EXCLUDED.health_score,
                last_heartbeat = EXCLUDED.last_heartbeat,
                retired_at = EXCLUDED.retired_at
            "#,
        )
        .bind(node.id.as_str())
        .bind(&node.team_id)
        .bind(&node.version)
        .bind(&node.base_url)
        .bind(serde_json::to_value(&node.reasoners)?)
        .bind(serde_json::to_value(&node.skills)?)
        .bind(node.state.as_str())
        .bind(node.health_score as i16)
        .bind(node.last_heartbeat)
        .bind(node.registered_at)
        .bind(node.retired_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save agent node: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentNode>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM agent_nodes WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn list_all(&self) -> Result<Vec<AgentNode>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM agent_nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_node).collect()
    }
}

