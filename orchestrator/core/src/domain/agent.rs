// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Node Aggregate
//!
//! An agent node is an independently running process that exposes reasoner
//! and skill functions over HTTP. The control plane stores one canonical
//! [`AgentState`] per node; the coarse [`HealthStatus`] and the fine-grained
//! [`LifecycleStatus`] are derived views of that state plus the health score
//! and can never disagree with it.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agent identity, declared capabilities and liveness state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Health score below which an active agent is reported as degraded.
pub const DEGRADED_SCORE_THRESHOLD: u8 = 50;

/// Score assigned when a status probe reports the agent as running.
pub const PROBE_RUNNING_SCORE: u8 = 75;

/// Score assigned when an agent heartbeats on its own.
pub const HEARTBEAT_SCORE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Canonical lifecycle state persisted for every agent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Active,
    Inactive,
    Starting,
    Stopping,
    Error,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Active => "active",
            AgentState::Inactive => "inactive",
            AgentState::Starting => "starting",
            AgentState::Stopping => "stopping",
            AgentState::Error => "error",
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        match self {
            AgentState::Active => HealthStatus::Active,
            AgentState::Inactive | AgentState::Stopping | AgentState::Error => {
                HealthStatus::Inactive
            }
            AgentState::Starting => HealthStatus::Unknown,
        }
    }

    pub fn lifecycle_status(&self, health_score: u8) -> LifecycleStatus {
        match self {
            AgentState::Starting => LifecycleStatus::Starting,
            AgentState::Active if health_score >= DEGRADED_SCORE_THRESHOLD => LifecycleStatus::Ready,
            AgentState::Active | AgentState::Error => LifecycleStatus::Degraded,
            AgentState::Inactive | AgentState::Stopping => LifecycleStatus::Offline,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentState::Active),
            "inactive" => Ok(AgentState::Inactive),
            "starting" => Ok(AgentState::Starting),
            "stopping" => Ok(AgentState::Stopping),
            "error" => Ok(AgentState::Error),
            other => Err(format!("unknown agent state: {}", other)),
        }
    }
}

/// Coarse liveness view derived from [`AgentState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Active,
    Inactive,
    Unknown,
}

/// Fine-grained lifecycle view derived from [`AgentState`] and the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Starting,
    Ready,
    Degraded,
    Offline,
}

/// Kind of function an agent exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Reasoner,
    Skill,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Reasoner => "reasoner",
            TargetKind::Skill => "skill",
        }
    }

    /// Path segment used when invoking the function on the agent.
    pub fn path_segment(&self) -> &'static str {
        match self {
            TargetKind::Reasoner => "reasoners",
            TargetKind::Skill => "skills",
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reasoner" => Ok(TargetKind::Reasoner),
            "skill" => Ok(TargetKind::Skill),
            other => Err(format!("unknown target kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub id: AgentId,
    pub team_id: String,
    pub version: String,
    pub base_url: String,
    pub reasoners: Vec<String>,
    pub skills: Vec<String>,
    pub state: AgentState,
    pub health_score: u8,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl AgentNode {
    pub fn new(
        id: AgentId,
        team_id: impl Into<String>,
        base_url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id,
            team_id: team_id.into(),
            version: version.into(),
            base_url: base_url.into(),
            reasoners: Vec::new(),
            skills: Vec::new(),
            state: AgentState::Starting,
            health_score: 0,
            last_heartbeat: None,
            registered_at: Utc::now(),
            retired_at: None,
        }
    }

    pub fn with_reasoners<I, S>(mut self, reasoners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reasoners = reasoners.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = skills.into_iter().map(Into::into).collect();
        self
    }

    /// Looks up a function by name. Reasoners shadow skills with the same name.
    pub fn resolve_target(&self, name: &str) -> Option<TargetKind> {
        if self.reasoners.iter().any(|r| r == name) {
            Some(TargetKind::Reasoner)
        } else if self.skills.iter().any(|s| s == name) {
            Some(TargetKind::Skill)
        } else {
            None
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    pub fn retire(&mut self, at: DateTime<Utc>) {
        self.retired_at = Some(at);
        self.state = AgentState::Inactive;
        self.health_score = 0;
    }

    pub fn health_status(&self) -> HealthStatus {
        self.state.health_status()
    }

    pub fn lifecycle_status(&self) -> LifecycleStatus {
        self.state.lifecycle_status(self.health_score)
    }
}

/// Signal that produced a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Heartbeat,
    HealthCheck,
    Presence,
    Reconcile,
    Manual,
}

impl StatusSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusSource::Heartbeat => "heartbeat",
            StatusSource::HealthCheck => "health_check",
            StatusSource::Presence => "presence",
            StatusSource::Reconcile => "reconcile",
            StatusSource::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub at: DateTime<Utc>,
    pub source: StatusSource,
    pub reason: Option<String>,
}

/// Point-in-time view of an agent's status as served to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub agent_id: AgentId,
    pub state: AgentState,
    pub health_status: HealthStatus,
    pub lifecycle_status: LifecycleStatus,
    pub health_score: u8,
    pub source: StatusSource,
    pub reason: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
    pub state_transition: Option<StateTransition>,
    /// Set when the snapshot outlived its cache TTL and could not be refreshed.
    pub stale: bool,
}

impl AgentStatusSnapshot {
    pub fn from_node(node: &AgentNode, source: StatusSource, reason: Option<String>) -> Self {
        Self {
            agent_id: node.id.clone(),
            state: node.state,
            health_status: node.health_status(),
            lifecycle_status: node.lifecycle_status(),
            health_score: node.health_score,
            source,
            reason,
            last_seen: node.last_heartbeat,
            observed_at: Utc::now(),
            state_transition: None,
            stale: false,
        }
    }
}

/// A requested status change. `state` and `health_score` are optional so a
/// heartbeat can refresh liveness without asserting a new state.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentStatusUpdate {
    pub state: Option<AgentState>,
    pub health_score: Option<u8>,
    pub source: StatusSource,
    pub reason: Option<String>,
}

impl AgentStatusUpdate {
    pub fn new(source: StatusSource) -> Self {
        Self {
            state: None,
            health_score: None,
            source,
            reason: None,
        }
    }

    pub fn with_state(mut self, state: AgentState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.health_score = Some(score.min(100));
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
