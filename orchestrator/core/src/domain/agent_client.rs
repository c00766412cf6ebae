// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Client Contract
//!
//! Outbound calls from the control plane to agent processes. Every call
//! carries an explicit deadline; running past it is reported as
//! [`AgentClientError::Timeout`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::agent::{AgentId, AgentNode, TargetKind};
use crate::domain::execution::{ExecutionId, RunId};
use crate::domain::mcp::McpHealthSummary;

/// Body of an agent's `/status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub status: String,
    #[serde(default)]
    pub uptime: Option<String>,
}

impl AgentStatusReport {
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

/// Correlation identifiers forwarded to the agent with every invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationContext {
    pub run_id: RunId,
    pub execution_id: ExecutionId,
    pub parent_execution_id: Option<ExecutionId>,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentClientError {
    #[error("Agent {0} is not registered")]
    UnknownAgent(AgentId),

    #[error("Request to agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent unreachable: {0}")]
    Unreachable(String),

    #[error("Agent returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response from agent: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn get_agent_status(
        &self,
        agent_id: &AgentId,
        timeout: Duration,
    ) -> Result<AgentStatusReport, AgentClientError>;

    async fn get_mcp_health(
        &self,
        agent_id: &AgentId,
        timeout: Duration,
    ) -> Result<McpHealthSummary, AgentClientError>;

    async fn invoke(
        &self,
        node: &AgentNode,
        kind: TargetKind,
        function: &str,
        input: &serde_json::Value,
        context: &InvocationContext,
        timeout: Duration,
    ) -> Result<serde_json::Value, AgentClientError>;
}
