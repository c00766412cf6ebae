// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Aggregate
//!
//! One execution is a single invocation of a reasoner or skill on an agent
//! node. Executions that share a `run_id` form a workflow run; the
//! `parent_execution_id` link reconstructs the causal tree.
//!
//! Status moves forward only: once an execution reaches a terminal status it
//! can never be moved to a different one. This is what keeps a late
//! completion from overwriting a timeout written by the reaper, and the
//! reaper from overwriting a completion that committed first.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Execution records, status transitions and query filters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::agent::{AgentId, TargetKind};
use crate::domain::webhook::WebhookEvent;

/// Error message written by the stale-execution reaper.
pub const TIMED_OUT_MESSAGE: &str = "execution timed out";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(format!("exec_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(format!("run_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    /// Statuses the reaper considers stuck once they outlive the threshold.
    pub const NON_TERMINAL: [ExecutionStatus; 3] = [
        ExecutionStatus::Running,
        ExecutionStatus::Pending,
        ExecutionStatus::Queued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Timeout
        )
    }

    /// Failed, timed out or cancelled.
    pub fn is_incident(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed | ExecutionStatus::Cancelled | ExecutionStatus::Timeout
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    /// Accepts the legacy aliases older agents still report.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "queued" => Ok(ExecutionStatus::Queued),
            "running" | "in_progress" => Ok(ExecutionStatus::Running),
            "succeeded" | "success" | "completed" => Ok(ExecutionStatus::Succeeded),
            "failed" | "error" => Ok(ExecutionStatus::Failed),
            "cancelled" | "canceled" => Ok(ExecutionStatus::Cancelled),
            "timeout" | "timed_out" => Ok(ExecutionStatus::Timeout),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecutionTransitionError {
    #[error("execution {execution_id} is already {from}; cannot move to {to}")]
    AlreadyTerminal {
        execution_id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    #[error("execution {execution_id} is {status} and can no longer change")]
    Sealed {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub run_id: RunId,
    pub parent_execution_id: Option<ExecutionId>,
    pub agent_node_id: AgentId,
    pub reasoner_id: String,
    pub target_kind: TargetKind,
    pub status: ExecutionStatus,
    pub input_uri: Option<String>,
    pub result_uri: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Read-side enrichment; never persisted on the execution row.
    #[serde(default)]
    pub webhook_registered: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_events: Vec<WebhookEvent>,
}

impl Execution {
    pub fn new(
        execution_id: ExecutionId,
        run_id: RunId,
        agent_node_id: AgentId,
        reasoner_id: impl Into<String>,
        target_kind: TargetKind,
        status: ExecutionStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            run_id,
            parent_execution_id: None,
            agent_node_id,
            reasoner_id: reasoner_id.into(),
            target_kind,
            status,
            input_uri: None,
            result_uri: None,
            error_message: None,
            started_at,
            completed_at: None,
            duration_ms: None,
            session_id: None,
            actor_id: None,
            created_at: started_at,
            updated_at: started_at,
            webhook_registered: false,
            webhook_events: Vec::new(),
        }
    }

    /// Moves to `status`. Re-asserting a terminal status is a no-op; leaving a
    /// terminal status is rejected.
    pub fn transition(
        &mut self,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), ExecutionTransitionError> {
        if self.status.is_terminal() {
            if self.status == status {
                return Ok(());
            }
            return Err(ExecutionTransitionError::AlreadyTerminal {
                execution_id: self.execution_id.clone(),
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.updated_at = at;
        Ok(())
    }

    /// Records a terminal outcome together with completion time and duration.
    /// An execution completes once; a second completion is rejected whatever
    /// its status.
    pub fn complete(
        &mut self,
        status: ExecutionStatus,
        at: DateTime<Utc>,
        result_uri: Option<String>,
        error_message: Option<String>,
    ) -> Result<(), ExecutionTransitionError> {
        if self.status.is_terminal() {
            return Err(ExecutionTransitionError::AlreadyTerminal {
                execution_id: self.execution_id.clone(),
                from: self.status,
                to: status,
            });
        }
        self.transition(status, at)?;
        self.completed_at = Some(at);
        self.duration_ms = Some((at - self.started_at).num_milliseconds().max(0));
        if result_uri.is_some() {
            self.result_uri = result_uri;
        }
        if error_message.is_some() {
            self.error_message = error_message;
        }
        Ok(())
    }

    /// Marks a stuck execution as timed out.
    pub fn time_out(&mut self, at: DateTime<Utc>) -> Result<(), ExecutionTransitionError> {
        self.complete(
            ExecutionStatus::Timeout,
            at,
            None,
            Some(TIMED_OUT_MESSAGE.to_string()),
        )
    }
}

/// Column an execution listing is ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    StartedAt,
    Status,
    DurationMs,
    AgentNodeId,
    ReasonerId,
    ExecutionId,
    RunId,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::StartedAt => "started_at",
            SortField::Status => "status",
            SortField::DurationMs => "duration_ms",
            SortField::AgentNodeId => "agent_node_id",
            SortField::ReasonerId => "reasoner_id",
            SortField::ExecutionId => "execution_id",
            SortField::RunId => "run_id",
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
        }
    }

    pub fn compare(&self, a: &Execution, b: &Execution) -> Ordering {
        match self {
            SortField::StartedAt => a.started_at.cmp(&b.started_at),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
            SortField::DurationMs => a.duration_ms.cmp(&b.duration_ms),
            SortField::AgentNodeId => a.agent_node_id.cmp(&b.agent_node_id),
            SortField::ReasonerId => a.reasoner_id.cmp(&b.reasoner_id),
            SortField::ExecutionId => a.execution_id.cmp(&b.execution_id),
            SortField::RunId => a.run_id.cmp(&b.run_id),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started_at" | "when" => Ok(SortField::StartedAt),
            "status" => Ok(SortField::Status),
            "duration_ms" | "duration" => Ok(SortField::DurationMs),
            "agent_node_id" => Ok(SortField::AgentNodeId),
            "reasoner_id" => Ok(SortField::ReasonerId),
            "execution_id" => Ok(SortField::ExecutionId),
            "run_id" => Ok(SortField::RunId),
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            other => Err(format!("unsupported sort field: {}", other)),
        }
    }
}

/// Query over execution records. Every populated field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionFilter {
    pub execution_id: Option<ExecutionId>,
    pub run_id: Option<RunId>,
    pub parent_execution_id: Option<ExecutionId>,
    pub agent_node_id: Option<AgentId>,
    pub reasoner_id: Option<String>,
    pub statuses: Vec<ExecutionStatus>,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub sort: SortField,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl ExecutionFilter {
    pub fn for_run(run_id: RunId) -> Self {
        Self {
            run_id: Some(run_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn started_after(mut self, at: DateTime<Utc>) -> Self {
        self.started_after = Some(at);
        self
    }

    pub fn sorted_by(mut self, field: SortField, descending: bool) -> Self {
        self.sort = field;
        self.descending = descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, got: &T) -> bool {
            want.as_ref().map_or(true, |w| w == got)
        }

        eq(&self.execution_id, &execution.execution_id)
            && eq(&self.run_id, &execution.run_id)
            && self
                .parent_execution_id
                .as_ref()
                .map_or(true, |p| execution.parent_execution_id.as_ref() == Some(p))
            && eq(&self.agent_node_id, &execution.agent_node_id)
            && eq(&self.reasoner_id, &execution.reasoner_id)
            && (self.statuses.is_empty() || self.statuses.contains(&execution.status))
            && self
                .session_id
                .as_ref()
                .map_or(true, |s| execution.session_id.as_ref() == Some(s))
            && self
                .actor_id
                .as_ref()
                .map_or(true, |a| execution.actor_id.as_ref() == Some(a))
            && self.started_after.map_or(true, |t| execution.started_at >= t)
            && self.started_before.map_or(true, |t| execution.started_at <= t)
    }

    /// Filters, orders and pages an in-memory set of executions.
    pub fn apply(&self, executions: impl IntoIterator<Item = Execution>) -> Vec<Execution> {
        let mut matched: Vec<Execution> =
            executions.into_iter().filter(|e| self.matches(e)).collect();
        matched.sort_by(|a, b| {
            let ord = self
                .sort
                .compare(a, b)
                .then_with(|| a.execution_id.cmp(&b.execution_id));
            if self.descending {
                ord.reverse()
            } else {
                ord
            }
        });
        let iter = matched.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
