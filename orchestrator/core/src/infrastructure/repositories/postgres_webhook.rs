// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Webhook Repository
//!
//! Registrations live in `execution_webhooks` (one per execution). Delivery
//! attempts are appended to `execution_webhook_events` and never updated.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;

use crate::domain::execution::ExecutionId;
use crate::domain::repository::{RepositoryError, WebhookRepository};
use crate::domain::webhook::{DeliveryStatus, WebhookEvent, WebhookRegistration};

pub struct PostgresWebhookRepository {
    pool: PgPool,
}

impl PostgresWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &PgRow) -> Result<WebhookEvent, RepositoryError> {
        let status: String = row.try_get("status")?;
        let http_status: Option<i32> = row.try_get("http_status")?;

        Ok(WebhookEvent {
            execution_id: ExecutionId(row.try_get("execution_id")?),
            event_type: row.try_get("event_type")?,
            status: match status.as_str() {
                "delivered" => DeliveryStatus::Delivered,
                _ => DeliveryStatus::Failed,
            },
            http_status: http_status.and_then(|s| u16::try_from(s).ok()),
            error: row.try_get("error")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl WebhookRepository for PostgresWebhookRepository {
    async fn register(&self, registration: &WebhookRegistration) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO execution_webhooks (execution_id, url, secret, headers, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (execution_id) DO UPDATE SET
                url = EXCLUDED.url,
                secret = EXCLUDED.secret,
                headers = EXCLUDED.headers
            "#,
        )
        .bind(registration.execution_id.as_str())
        .bind(&registration.url)
        .bind(&registration.secret)
        .bind(serde_json::to_value(&registration.headers)?)
        .bind(registration.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to register webhook: {}", e)))?;

        Ok(())
    }

    async fn find_registration(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<WebhookRegistration>, RepositoryError> {
        let row = sqlx::query(
            "SELECT execution_id, url, secret, headers, created_at FROM execution_webhooks WHERE execution_id = $1",
        )
        .bind(execution_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let headers: serde_json::Value = row.try_get("headers")?;
        let headers: BTreeMap<String, String> = serde_json::from_value(headers)?;

        Ok(Some(WebhookRegistration {
            execution_id: ExecutionId(row.try_get("execution_id")?),
            url: row.try_get("url")?,
            secret: row.try_get("secret")?,
            headers,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn append_event(&self, event: &WebhookEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO execution_webhook_events (
                execution_id, event_type, status, http_status, error, payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.execution_id.as_str())
        .bind(&event.event_type)
        .bind(event.status.as_str())
        .bind(event.http_status.map(i32::from))
        .bind(&event.error)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_events(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, event_type, status, http_status, error, payload, created_at
            FROM execution_webhook_events
            WHERE execution_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(execution_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_event).collect()
    }
}
