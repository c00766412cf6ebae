// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Execution Repository
//!
//! `ExecutionRepository` backed by the `executions` table.
//!
//! `update` runs the caller's mutator between `SELECT ... FOR UPDATE` and the
//! write-back inside one transaction, so concurrent completions and reaper
//! sweeps serialize on the row. `mark_stale` selects candidates with
//! `FOR UPDATE SKIP LOCKED` and re-checks the status in the `UPDATE`, so a row
//! that completed in the meantime is never overwritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::domain::agent::AgentId;
use crate::domain::execution::{
    Execution, ExecutionFilter, ExecutionId, ExecutionStatus, RunId, TIMED_OUT_MESSAGE,
};
use crate::domain::repository::{
    guard_transition, ExecutionMutator, ExecutionRepository, RepositoryError,
};

const COLUMNS: &str = "execution_id, run_id, parent_execution_id, agent_node_id, reasoner_id, \
    target_kind, status, input_uri, result_uri, error_message, started_at, completed_at, \
    duration_ms, session_id, actor_id, created_at, updated_at";

pub struct PostgresExecutionRepository {
    pool: PgPool,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &PgRow) -> Result<Execution, RepositoryError> {
        let status: String = row.try_get("status")?;
        let target_kind: String = row.try_get("target_kind")?;
        let parent: Option<String> = row.try_get("parent_execution_id")?;

        Ok(Execution {
            execution_id: ExecutionId(row.try_get("execution_id")?),
            run_id: RunId(row.try_get("run_id")?),
            parent_execution_id: parent.map(ExecutionId),
            agent_node_id: AgentId(row.try_get("agent_node_id")?),
            reasoner_id: row.try_get("reasoner_id")?,
            target_kind: target_kind.parse().map_err(RepositoryError::Serialization)?,
            status: status.parse().map_err(RepositoryError::Serialization)?,
            input_uri: row.try_get("input_uri")?,
            result_uri: row.try_get("result_uri")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            duration_ms: row.try_get("duration_ms")?,
            session_id: row.try_get("session_id")?,
            actor_id: row.try_get("actor_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            webhook_registered: false,
            webhook_events: Vec::new(),
        })
    }

    fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a ExecutionFilter) {
        builder.push(" WHERE TRUE");
        if let Some(id) = &filter.execution_id {
            builder.push(" AND execution_id = ").push_bind(id.as_str());
        }
        if let Some(run_id) = &filter.run_id {
            builder.push(" AND run_id = ").push_bind(run_id.as_str());
        }
        if let Some(parent) = &filter.parent_execution_id {
            builder.push(" AND parent_execution_id = ").push_bind(parent.as_str());
        }
        if let Some(agent) = &filter.agent_node_id {
            builder.push(" AND agent_node_id = ").push_bind(agent.as_str());
        }
        if let Some(reasoner) = &filter.reasoner_id {
            builder.push(" AND reasoner_id = ").push_bind(reasoner.as_str());
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<&'static str> = filter.statuses.iter().map(|s| s.as_str()).collect();
            builder.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(session) = &filter.session_id {
            builder.push(" AND session_id = ").push_bind(session.as_str());
        }
        if let Some(actor) = &filter.actor_id {
            builder.push(" AND actor_id = ").push_bind(actor.as_str());
        }
        if let Some(after) = filter.started_after {
            builder.push(" AND started_at >= ").push_bind(after);
        }
        if let Some(before) = filter.started_before {
            builder.push(" AND started_at <= ").push_bind(before);
        }
    }
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    async fn create(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                execution_id, run_id, parent_execution_id, agent_node_id, reasoner_id,
                target_kind, status, input_uri, result_uri, error_message,
                started_at, completed_at, duration_ms, session_id, actor_id,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (execution_id) DO NOTHING
            "#,
        )
        .bind(execution.execution_id.as_str())
        .bind(execution.run_id.as_str())
        .bind(execution.parent_execution_id.as_ref().map(|p| p.as_str()))
        .bind(execution.agent_node_id.as_str())
        .bind(&execution.reasoner_id)
        .bind(execution.target_kind.as_str())
        .bind(execution.status.as_str())
        .bind(&execution.input_uri)
        .bind(&execution.result_uri)
        .bind(&execution.error_message)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.session_id)
        .bind(&execution.actor_id)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to create execution: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(execution.execution_id.to_string()));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM executions WHERE execution_id = $1", COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn update(
        &self,
        id: &ExecutionId,
        mutator: ExecutionMutator,
    ) -> Result<Execution, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM executions WHERE execution_id = $1 FOR UPDATE",
            COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("execution {}", id)))?;
        let current = Self::row_to_execution(&row)?;

        let Some(next) = mutator(current.clone())? else {
            tx.rollback().await?;
            return Ok(current);
        };
        guard_transition(&current, &next)?;

        sqlx::query(
            r#"
            UPDATE executions SET
                status = $2,
                input_uri = $3,
                result_uri = $4,
                error_message = $5,
                completed_at = $6,
                duration_ms = $7,
                session_id = $8,
                actor_id = $9,
                updated_at = $10
            WHERE execution_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(next.status.as_str())
        .bind(&next.input_uri)
        .bind(&next.result_uri)
        .bind(&next.error_message)
        .bind(next.completed_at)
        .bind(next.duration_ms)
        .bind(&next.session_id)
        .bind(&next.actor_id)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn query(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, RepositoryError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM executions", COLUMNS));
        Self::push_filters(&mut builder, filter);

        builder
            .push(" ORDER BY ")
            .push(filter.sort.column())
            .push(if filter.descending { " DESC" } else { " ASC" })
            .push(", execution_id")
            .push(if filter.descending { " DESC" } else { " ASC" });
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }
        if filter.offset > 0 {
            builder.push(" OFFSET ").push_bind(filter.offset as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn mark_stale(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let non_terminal: Vec<&'static str> = ExecutionStatus::NON_TERMINAL
            .iter()
            .map(|s| s.as_str())
            .collect();

        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT execution_id FROM executions
            WHERE status = ANY($1) AND started_at <= $2
            ORDER BY started_at ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(&non_terminal)
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            r#"
            UPDATE executions SET
                status = $1,
                error_message = $2,
                completed_at = $3,
                duration_ms = GREATEST(0, (EXTRACT(EPOCH FROM ($3 - started_at)) * 1000)::BIGINT),
                updated_at = $3
            WHERE execution_id = ANY($4) AND status = ANY($5)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(ExecutionStatus::Timeout.as_str())
        .bind(TIMED_OUT_MESSAGE)
        .bind(now)
        .bind(&ids)
        .bind(&non_terminal)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut reaped = rows
            .iter()
            .map(Self::row_to_execution)
            .collect::<Result<Vec<_>, _>>()?;
        reaped.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(reaped)
    }
}
