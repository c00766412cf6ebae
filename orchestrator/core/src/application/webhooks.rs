// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Webhook notifier
//!
//! Owns per-execution webhook registrations. Every status-affecting mutation
//! of a registered execution produces exactly one delivery attempt, and every
//! attempt is appended to the delivery history whatever its outcome.
//!
//! Deliveries for one execution go through a single queue drained by one
//! task, so a receiver sees `started` before `completed`. The queue closes
//! after the terminal status is delivered.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::events::ExecutionEvent;
use crate::domain::execution::{Execution, ExecutionId};
use crate::domain::repository::{RepositoryError, WebhookRepository};
use crate::domain::webhook::{WebhookEvent, WebhookRegistration};
use crate::infrastructure::webhook_sender::HttpWebhookSender;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Accepts absolute `http` and `https` URLs only.
pub fn validate_url(url: &str) -> Result<(), WebhookError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| WebhookError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WebhookError::InvalidUrl(format!("unsupported scheme in {}", url)));
    }
    Ok(())
}

pub struct WebhookNotifier {
    repository: Arc<dyn WebhookRepository>,
    sender: HttpWebhookSender,
    queues: DashMap<ExecutionId, mpsc::UnboundedSender<Execution>>,
}

impl WebhookNotifier {
    pub fn new(repository: Arc<dyn WebhookRepository>, sender: HttpWebhookSender) -> Self {
        Self {
            repository,
            sender,
            queues: DashMap::new(),
        }
    }

    /// Creates or replaces the registration for an execution.
    pub async fn register(
        &self,
        execution_id: ExecutionId,
        url: &str,
        secret: Option<String>,
        headers: BTreeMap<String, String>,
    ) -> Result<WebhookRegistration, WebhookError> {
        validate_url(url)?;

        let mut registration = WebhookRegistration::new(execution_id, url);
        registration.secret = secret.filter(|s| !s.is_empty());
        registration.headers = headers;
        self.repository.register(&registration).await?;

        debug!(execution_id = %registration.execution_id, url = %registration.url, "Registered execution webhook");
        Ok(registration)
    }

    /// Queues delivery for the execution's current status behind any earlier
    /// ones. Returns immediately.
    pub fn notify(self: &Arc<Self>, execution: Execution) {
        let execution_id = execution.execution_id.clone();
        let fresh = match self.queues.entry(execution_id.clone()) {
            Entry::Occupied(mut entry) => match entry.get().send(execution) {
                Ok(()) => None,
                // The previous drain task already finished.
                Err(mpsc::error::SendError(execution)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let _ = tx.send(execution);
                    entry.insert(tx);
                    Some(rx)
                }
            },
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(execution);
                entry.insert(tx);
                Some(rx)
            }
        };

        if let Some(rx) = fresh {
            let notifier = Arc::clone(self);
            tokio::spawn(async move {
                notifier.drain(execution_id, rx).await;
            });
        }
    }

    async fn drain(&self, execution_id: ExecutionId, mut rx: mpsc::UnboundedReceiver<Execution>) {
        while let Some(execution) = rx.recv().await {
            let terminal = execution.status.is_terminal();
            self.deliver(&execution).await;
            if terminal {
                break;
            }
        }

        rx.close();
        self.queues.remove_if(&execution_id, |_, tx| tx.is_closed());
        while let Ok(execution) = rx.try_recv() {
            self.deliver(&execution).await;
        }
    }

    /// Delivers the execution's current status if a webhook is registered and
    /// records the attempt.
    pub async fn deliver(&self, execution: &Execution) -> Option<WebhookEvent> {
        let registration = match self.repository.find_registration(&execution.execution_id).await {
            Ok(Some(registration)) => registration,
            Ok(None) => return None,
            Err(e) => {
                warn!(execution_id = %execution.execution_id, error = %e, "Failed to load webhook registration");
                return None;
            }
        };

        let event_type = ExecutionEvent::from_execution(execution).event_type();
        let payload = json!({
            "event": event_type,
            "execution_id": execution.execution_id,
            "run_id": execution.run_id,
            "agent_node_id": execution.agent_node_id,
            "reasoner_id": execution.reasoner_id,
            "status": execution.status,
            "result_uri": execution.result_uri,
            "error_message": execution.error_message,
            "started_at": execution.started_at,
            "completed_at": execution.completed_at,
            "duration_ms": execution.duration_ms,
            "timestamp": Utc::now(),
        });

        let outcome = self.sender.deliver(&registration, event_type, &payload).await;
        metrics::counter!("brain_webhook_deliveries_total", "status" => outcome.status.as_str()).increment(1);
        if let Some(error) = &outcome.error {
            warn!(execution_id = %execution.execution_id, url = %registration.url, error = %error, "Webhook delivery failed");
        }

        let event = WebhookEvent {
            execution_id: execution.execution_id.clone(),
            event_type: event_type.to_string(),
            status: outcome.status,
            http_status: outcome.http_status,
            error: outcome.error,
            payload,
            created_at: Utc::now(),
        };
        if let Err(e) = self.repository.append_event(&event).await {
            warn!(execution_id = %execution.execution_id, error = %e, "Failed to record webhook delivery");
        }
        Some(event)
    }

    /// Fills `webhook_registered` and `webhook_events`. Storage failures are
    /// logged and leave the fields at their defaults.
    pub async fn enrich(&self, execution: &mut Execution) {
        let id = &execution.execution_id;
        let registration = match self.repository.find_registration(id).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!(execution_id = %id, error = %e, "Webhook enrichment unavailable");
                return;
            }
        };
        if registration.is_none() {
            return;
        }
        match self.repository.list_events(id).await {
            Ok(events) => {
                execution.webhook_registered = true;
                execution.webhook_events = events;
            }
            Err(e) => warn!(execution_id = %id, error = %e, "Webhook enrichment unavailable"),
        }
    }
}
