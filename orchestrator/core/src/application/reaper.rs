// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Stale Execution Reaper - background sweep for stuck executions
//!
//! Periodically times out executions that have sat in `running`, `pending`
//! or `queued` for longer than the configured threshold. Each sweep handles
//! one bounded batch in a single store transaction; rows that completed in
//! the meantime are left alone.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Guarantee every execution eventually reaches a terminal status

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::webhooks::WebhookNotifier;
use crate::domain::config::ExecutionsConfig;
use crate::domain::events::ExecutionEvent;
use crate::domain::repository::{ExecutionRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Age after which a non-terminal execution is considered stuck
    pub stale_after: Duration,

    pub interval: Duration,

    /// Maximum executions timed out per sweep
    pub batch_size: usize,

    pub enabled: bool,
}

impl From<&ExecutionsConfig> for ReaperConfig {
    fn from(config: &ExecutionsConfig) -> Self {
        Self {
            stale_after: config.stale_after,
            interval: config.reap_interval,
            batch_size: config.reap_batch_size,
            enabled: config.reaper_enabled,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self::from(&ExecutionsConfig::default())
    }
}

pub struct StaleExecutionReaper {
    executions: Arc<dyn ExecutionRepository>,
    events: Option<EventBus<ExecutionEvent>>,
    webhooks: Option<Arc<WebhookNotifier>>,
    config: ReaperConfig,
}

impl StaleExecutionReaper {
    pub fn new(executions: Arc<dyn ExecutionRepository>, config: ReaperConfig) -> Self {
        Self {
            executions,
            events: None,
            webhooks: None,
            config,
        }
    }

    pub fn with_events(mut self, events: EventBus<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Arc<WebhookNotifier>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    /// Start the reaper background task
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Stale execution reaper is disabled");
            return;
        }

        info!(
            stale_after = ?self.config.stale_after,
            interval = ?self.config.interval,
            batch_size = self.config.batch_size,
            "Starting stale execution reaper"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(0) => debug!("Reaper sweep found nothing stale"),
                        Ok(reaped) => info!(reaped, "Reaper sweep timed out stale executions"),
                        Err(e) => warn!("Reaper sweep failed: {}", e),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Stale execution reaper shutting down");
                    break;
                }
            }
        }
    }

    /// Times out one batch of stale executions. Returns how many were changed.
    pub async fn sweep(&self) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| RepositoryError::Database(format!("invalid stale threshold: {}", e)))?;
        let cutoff = now - stale_after;

        let reaped = self
            .executions
            .mark_stale(cutoff, self.config.batch_size, now)
            .await?;

        for execution in &reaped {
            debug!(
                execution_id = %execution.execution_id,
                started_at = %execution.started_at,
                "Timed out stale execution"
            );
            if let Some(events) = &self.events {
                events.publish(ExecutionEvent::from_execution(execution));
            }
            if let Some(webhooks) = &self.webhooks {
                webhooks.notify(execution.clone());
            }
        }

        if !reaped.is_empty() {
            metrics::counter!("brain_executions_reaped_total").increment(reaped.len() as u64);
        }
        Ok(reaped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentId, TargetKind};
    use crate::domain::execution::{
        Execution, ExecutionId, ExecutionStatus, RunId, TIMED_OUT_MESSAGE,
    };
    use crate::infrastructure::repositories::InMemoryExecutionRepository;

    async fn seed(repo: &InMemoryExecutionRepository, id: &str, status: ExecutionStatus, age_secs: i64) {
        let execution = Execution::new(
            ExecutionId::from(id),
            RunId::from("run-1"),
            AgentId::from("agent-a"),
            "summarize",
            TargetKind::Reasoner,
            status,
            Utc::now() - chrono::Duration::seconds(age_secs),
        );
        repo.create(&execution).await.unwrap();
    }

    fn config(batch_size: usize) -> ReaperConfig {
        ReaperConfig {
            stale_after: Duration::from_secs(60),
            interval: Duration::from_secs(60),
            batch_size,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_times_out_only_stale_non_terminal() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        seed(&repo, "stale-running", ExecutionStatus::Running, 90).await;
        seed(&repo, "stale-queued", ExecutionStatus::Queued, 120).await;
        seed(&repo, "fresh-running", ExecutionStatus::Running, 10).await;
        seed(&repo, "old-succeeded", ExecutionStatus::Succeeded, 600).await;

        let bus: EventBus<ExecutionEvent> = EventBus::new(16);
        let mut rx = bus.subscribe();
        let reaper = StaleExecutionReaper::new(repo.clone(), config(100)).with_events(bus);

        assert_eq!(reaper.sweep().await.unwrap(), 2);

        let stale = repo.find_by_id(&ExecutionId::from("stale-running")).await.unwrap().unwrap();
        assert_eq!(stale.status, ExecutionStatus::Timeout);
        assert_eq!(stale.error_message.as_deref(), Some(TIMED_OUT_MESSAGE));
        assert!(stale.duration_ms.unwrap() >= 90_000);

        let fresh = repo.find_by_id(&ExecutionId::from("fresh-running")).await.unwrap().unwrap();
        assert_eq!(fresh.status, ExecutionStatus::Running);
        let done = repo.find_by_id(&ExecutionId::from("old-succeeded")).await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Succeeded);

        let mut failed_events = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.event_type(), "execution.failed");
            failed_events += 1;
        }
        assert_eq!(failed_events, 2);

        // Second sweep finds nothing left.
        assert_eq!(reaper.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_each_sweep() {
        let repo = Arc::new(InMemoryExecutionRepository::new());
        for i in 0..5 {
            seed(&repo, &format!("exec-{}", i), ExecutionStatus::Pending, 300 + i).await;
        }
        let reaper = StaleExecutionReaper::new(repo.clone(), config(2));

        assert_eq!(reaper.sweep().await.unwrap(), 2);
        assert_eq!(reaper.sweep().await.unwrap(), 2);
        assert_eq!(reaper.sweep().await.unwrap(), 1);

        // Oldest first: exec-4 started earliest.
        let oldest = repo.find_by_id(&ExecutionId::from("exec-4")).await.unwrap().unwrap();
        assert_eq!(oldest.status, ExecutionStatus::Timeout);
    }
}
