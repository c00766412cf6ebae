// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is
//! injected into every PostgreSQL repository. Schema migrations under
//! `orchestrator/core/migrations` are embedded at compile time and applied on
//! connect.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    /// Connects and brings the schema up to date.
    pub async fn connect_and_migrate(connection_string: &str, max_connections: u32) -> Result<Self> {
        let db = Self::new(connection_string, max_connections).await?;
        sqlx::migrate!("./migrations")
            .run(&db.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
        Ok(db)
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
