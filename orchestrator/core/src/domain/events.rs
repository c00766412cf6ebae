// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Events
//!
//! Events are grouped by category and each category travels on its own typed
//! bus (see `crate::infrastructure::event_bus`):
//!
//! | Enum | Published by |
//! |------|--------------|
//! | [`AgentEvent`] | status manager, health monitor, agent registry |
//! | [`ExecutionEvent`] | dispatcher, stale-execution reaper |
//! | [`WorkflowRunEvent`] | dispatcher |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, LifecycleStatus, StatusSource};
use crate::domain::execution::{Execution, ExecutionId, ExecutionStatus, RunId};
use crate::domain::mcp::McpStatusView;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentRegistered {
        agent_id: AgentId,
        registered_at: DateTime<Utc>,
    },
    AgentOnline {
        agent_id: AgentId,
        source: StatusSource,
        at: DateTime<Utc>,
    },
    AgentOffline {
        agent_id: AgentId,
        source: StatusSource,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    AgentHealthChanged {
        agent_id: AgentId,
        health_score: u8,
        lifecycle_status: LifecycleStatus,
        at: DateTime<Utc>,
    },
    McpHealthChanged {
        agent_id: AgentId,
        mcp: McpStatusView,
        at: DateTime<Utc>,
    },
    AgentUnregistered {
        agent_id: AgentId,
        at: DateTime<Utc>,
    },
}

impl AgentEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            AgentEvent::AgentRegistered { agent_id, .. }
            | AgentEvent::AgentOnline { agent_id, .. }
            | AgentEvent::AgentOffline { agent_id, .. }
            | AgentEvent::AgentHealthChanged { agent_id, .. }
            | AgentEvent::McpHealthChanged { agent_id, .. }
            | AgentEvent::AgentUnregistered { agent_id, .. } => agent_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionCreated {
        execution_id: ExecutionId,
        run_id: RunId,
        agent_node_id: AgentId,
        reasoner_id: String,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    },
    ExecutionStarted {
        execution_id: ExecutionId,
        run_id: RunId,
        at: DateTime<Utc>,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        run_id: RunId,
        duration_ms: Option<i64>,
        result_uri: Option<String>,
        at: DateTime<Utc>,
    },
    /// Covers `failed`, `timeout` and `cancelled`.
    ExecutionFailed {
        execution_id: ExecutionId,
        run_id: RunId,
        status: ExecutionStatus,
        error: Option<String>,
        duration_ms: Option<i64>,
        at: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Builds the event that describes the execution's current status.
    pub fn from_execution(execution: &Execution) -> Self {
        let execution_id = execution.execution_id.clone();
        let run_id = execution.run_id.clone();
        let at = execution.updated_at;
        match execution.status {
            ExecutionStatus::Pending | ExecutionStatus::Queued => ExecutionEvent::ExecutionCreated {
                execution_id,
                run_id,
                agent_node_id: execution.agent_node_id.clone(),
                reasoner_id: execution.reasoner_id.clone(),
                status: execution.status,
                at,
            },
            ExecutionStatus::Running => ExecutionEvent::ExecutionStarted {
                execution_id,
                run_id,
                at,
            },
            ExecutionStatus::Succeeded => ExecutionEvent::ExecutionCompleted {
                execution_id,
                run_id,
                duration_ms: execution.duration_ms,
                result_uri: execution.result_uri.clone(),
                at,
            },
            status => ExecutionEvent::ExecutionFailed {
                execution_id,
                run_id,
                status,
                error: execution.error_message.clone(),
                duration_ms: execution.duration_ms,
                at,
            },
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            ExecutionEvent::ExecutionCreated { execution_id, .. }
            | ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::ExecutionCompleted { execution_id, .. }
            | ExecutionEvent::ExecutionFailed { execution_id, .. } => execution_id,
        }
    }

    /// Dotted name used as the webhook `event` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            ExecutionEvent::ExecutionCreated { .. } => "execution.created",
            ExecutionEvent::ExecutionStarted { .. } => "execution.started",
            ExecutionEvent::ExecutionCompleted { .. } => "execution.completed",
            ExecutionEvent::ExecutionFailed { .. } => "execution.failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowRunEvent {
    RunStarted {
        run_id: RunId,
        root_execution_id: ExecutionId,
        at: DateTime<Utc>,
    },
    RunFinished {
        run_id: RunId,
        root_execution_id: ExecutionId,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    },
}
