// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP Agent Client
//!
//! `reqwest` implementation of [`AgentClient`]. Agent base URLs are resolved
//! from the agent repository on every call so a re-registration with a new
//! address takes effect immediately.
//!
//! | Call | Request |
//! |------|---------|
//! | status | `GET {base}/status` |
//! | MCP health | `GET {base}/mcp/health` |
//! | invoke | `POST {base}/reasoners/{name}` or `POST {base}/skills/{name}` |

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::agent::{AgentId, AgentNode, TargetKind};
use crate::domain::agent_client::{
    AgentClient, AgentClientError, AgentStatusReport, InvocationContext,
};
use crate::domain::mcp::McpHealthSummary;
use crate::domain::repository::AgentRepository;

pub const RUN_ID_HEADER: &str = "X-Run-ID";
pub const EXECUTION_ID_HEADER: &str = "X-Execution-ID";
pub const PARENT_EXECUTION_ID_HEADER: &str = "X-Parent-Execution-ID";
pub const SESSION_ID_HEADER: &str = "X-Session-ID";
pub const ACTOR_ID_HEADER: &str = "X-Actor-ID";

#[derive(Debug, Deserialize)]
struct McpHealthResponse {
    summary: McpHealthSummary,
}

pub struct HttpAgentClient {
    client: Client,
    agents: Arc<dyn AgentRepository>,
}

impl HttpAgentClient {
    pub fn new(agents: Arc<dyn AgentRepository>) -> Self {
        Self {
            client: Client::new(),
            agents,
        }
    }

    async fn base_url(&self, agent_id: &AgentId) -> Result<String, AgentClientError> {
        let node = self
            .agents
            .find_by_id(agent_id)
            .await
            .map_err(|e| AgentClientError::Unreachable(e.to_string()))?
            .ok_or_else(|| AgentClientError::UnknownAgent(agent_id.clone()))?;
        Ok(node.base_url.trim_end_matches('/').to_string())
    }

    async fn send(request: RequestBuilder, timeout: Duration) -> Result<Response, AgentClientError> {
        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                AgentClientError::Timeout(timeout)
            } else {
                AgentClientError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn get_agent_status(
        &self,
        agent_id: &AgentId,
        timeout: Duration,
    ) -> Result<AgentStatusReport, AgentClientError> {
        let url = format!("{}/status", self.base_url(agent_id).await?);
        Self::send(self.client.get(url), timeout)
            .await?
            .json::<AgentStatusReport>()
            .await
            .map_err(|e| AgentClientError::InvalidResponse(e.to_string()))
    }

    async fn get_mcp_health(
        &self,
        agent_id: &AgentId,
        timeout: Duration,
    ) -> Result<McpHealthSummary, AgentClientError> {
        let url = format!("{}/mcp/health", self.base_url(agent_id).await?);
        let response: McpHealthResponse = Self::send(self.client.get(url), timeout)
            .await?
            .json()
            .await
            .map_err(|e| AgentClientError::InvalidResponse(e.to_string()))?;
        Ok(response.summary)
    }

    async fn invoke(
        &self,
        node: &AgentNode,
        kind: TargetKind,
        function: &str,
        input: &serde_json::Value,
        context: &InvocationContext,
        timeout: Duration,
    ) -> Result<serde_json::Value, AgentClientError> {
        let url = format!(
            "{}/{}/{}",
            node.base_url.trim_end_matches('/'),
            kind.path_segment(),
            function
        );

        let mut request = self
            .client
            .post(url)
            .header(RUN_ID_HEADER, context.run_id.as_str())
            .header(EXECUTION_ID_HEADER, context.execution_id.as_str())
            .json(input);
        if let Some(parent) = &context.parent_execution_id {
            request = request.header(PARENT_EXECUTION_ID_HEADER, parent.as_str());
        }
        if let Some(session) = &context.session_id {
            request = request.header(SESSION_ID_HEADER, session.as_str());
        }
        if let Some(actor) = &context.actor_id {
            request = request.header(ACTOR_ID_HEADER, actor.as_str());
        }

        let response = Self::send(request, timeout).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgentClientError::InvalidResponse(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| AgentClientError::InvalidResponse(e.to_string()))
    }
}
