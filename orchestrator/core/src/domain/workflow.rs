// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Workflow Runs
//!
//! A workflow run is never stored. It is the set of executions sharing a
//! `run_id`, arranged into a tree through `parent_execution_id`, with a
//! status derived from its members.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Tree reconstruction and run-level rollups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::domain::agent::AgentId;
use crate::domain::execution::{Execution, ExecutionId, ExecutionStatus, RunId};

/// Run status from member statuses: any running, then any pending or queued,
/// then all succeeded, then failed, timeout, cancelled.
pub fn aggregate_status<I>(statuses: I) -> Option<ExecutionStatus>
where
    I: IntoIterator<Item = ExecutionStatus>,
{
    let mut seen = HashSet::new();
    for status in statuses {
        seen.insert(status);
    }
    if seen.is_empty() {
        return None;
    }

    let status = if seen.contains(&ExecutionStatus::Running) {
        ExecutionStatus::Running
    } else if seen.contains(&ExecutionStatus::Pending) {
        ExecutionStatus::Pending
    } else if seen.contains(&ExecutionStatus::Queued) {
        ExecutionStatus::Queued
    } else if seen.len() == 1 && seen.contains(&ExecutionStatus::Succeeded) {
        ExecutionStatus::Succeeded
    } else if seen.contains(&ExecutionStatus::Failed) {
        ExecutionStatus::Failed
    } else if seen.contains(&ExecutionStatus::Timeout) {
        ExecutionStatus::Timeout
    } else {
        ExecutionStatus::Cancelled
    };
    Some(status)
}

/// One execution placed in its run's tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub execution_id: ExecutionId,
    pub parent_execution_id: Option<ExecutionId>,
    pub agent_node_id: AgentId,
    pub reasoner_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub depth: u32,
    /// Direct children currently running
    pub active_children: usize,
    /// Direct children pending or queued
    pub pending_children: usize,
    pub children: Vec<ExecutionId>,
}

impl WorkflowNode {
    fn place(execution: &Execution, depth: u32, kids: &[&Execution]) -> Self {
        Self {
            execution_id: execution.execution_id.clone(),
            parent_execution_id: execution.parent_execution_id.clone(),
            agent_node_id: execution.agent_node_id.clone(),
            reasoner_id: execution.reasoner_id.clone(),
            status: execution.status,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            duration_ms: execution.duration_ms,
            depth,
            active_children: kids
                .iter()
                .filter(|k| k.status == ExecutionStatus::Running)
                .count(),
            pending_children: kids
                .iter()
                .filter(|k| matches!(k.status, ExecutionStatus::Pending | ExecutionStatus::Queued))
                .count(),
            children: kids.iter().map(|k| k.execution_id.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTree {
    pub root_execution_id: Option<ExecutionId>,
    /// Breadth-first from the root; orphans follow, ordered by start time
    pub nodes: Vec<WorkflowNode>,
    pub max_depth: u32,
}

impl ExecutionTree {
    /// Reconstructs the tree of a single run.
    ///
    /// The root is the earliest execution with no parent, or whose parent is
    /// not part of the set. Other such executions become additional depth-0
    /// roots so nothing is dropped.
    pub fn build(executions: &[Execution]) -> Self {
        let mut ordered: Vec<&Execution> = executions.iter().collect();
        ordered.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.execution_id.cmp(&b.execution_id))
        });

        let ids: HashSet<&ExecutionId> = ordered.iter().map(|e| &e.execution_id).collect();
        let mut children: HashMap<&ExecutionId, Vec<&Execution>> = HashMap::new();
        let mut tops: Vec<&Execution> = Vec::new();

        for execution in ordered.iter().copied() {
            match &execution.parent_execution_id {
                Some(parent) if ids.contains(parent) && parent != &execution.execution_id => {
                    children.entry(parent).or_default().push(execution)
                }
                _ => tops.push(execution),
            }
        }

        let mut nodes = Vec::with_capacity(ordered.len());
        let mut visited: HashSet<&ExecutionId> = HashSet::new();
        let mut max_depth = 0;
        let mut queue: VecDeque<(&Execution, u32)> = tops.iter().map(|e| (*e, 0)).collect();

        while let Some((execution, depth)) = queue.pop_front() {
            if !visited.insert(&execution.execution_id) {
                continue;
            }
            max_depth = max_depth.max(depth);
            let kids = children.get(&execution.execution_id).cloned().unwrap_or_default();
            nodes.push(WorkflowNode::place(execution, depth, &kids));
            for kid in kids {
                queue.push_back((kid, depth + 1));
            }
        }

        // Parent cycles never reach a top-level node; surface them as roots.
        for execution in ordered.iter().copied() {
            if !visited.contains(&execution.execution_id) {
                visited.insert(&execution.execution_id);
                nodes.push(WorkflowNode::place(execution, 0, &[]));
            }
        }

        Self {
            root_execution_id: tops.first().map(|e| e.execution_id.clone()),
            nodes,
            max_depth,
        }
    }

    pub fn root(&self) -> Option<&WorkflowNode> {
        let root = self.root_execution_id.as_ref()?;
        self.nodes.iter().find(|n| &n.execution_id == root)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunSummary {
    pub run_id: RunId,
    pub root_execution_id: Option<ExecutionId>,
    pub status: ExecutionStatus,
    pub display_name: String,
    pub current_task: String,
    pub root_reasoner: Option<String>,
    pub agent_node_id: Option<AgentId>,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
    pub total_executions: usize,
    pub status_counts: BTreeMap<String, usize>,
    pub active_executions: usize,
    pub max_depth: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub terminal: bool,
}

impl WorkflowRunSummary {
    /// Rolls up a run. Returns `None` for an empty set.
    pub fn summarize(run_id: RunId, executions: &[Execution]) -> Option<Self> {
        let status = aggregate_status(executions.iter().map(|e| e.status))?;
        let tree = ExecutionTree::build(executions);
        let root = tree
            .root_execution_id
            .as_ref()
            .and_then(|id| executions.iter().find(|e| &e.execution_id == id));

        let started_at = executions.iter().map(|e| e.started_at).min()?;
        let latest = executions
            .iter()
            .max_by(|a, b| {
                a.started_at
                    .cmp(&b.started_at)
                    .then_with(|| a.execution_id.cmp(&b.execution_id))
            })?;
        let updated_at = executions
            .iter()
            .map(|e| e.updated_at.max(e.started_at))
            .max()
            .unwrap_or(started_at);

        let mut status_counts = BTreeMap::new();
        let mut active_executions = 0;
        let mut completed_at: Option<DateTime<Utc>> = None;
        for execution in executions {
            *status_counts
                .entry(execution.status.as_str().to_string())
                .or_insert(0) += 1;
            if !execution.status.is_terminal() {
                active_executions += 1;
            }
            if let Some(done) = execution.completed_at {
                completed_at = Some(completed_at.map_or(done, |c| c.max(done)));
            }
        }
        // A run in flight has no completion yet, whatever its children report.
        if !status.is_terminal() {
            completed_at = None;
        }

        let root_reasoner = root.map(|r| r.reasoner_id.clone()).filter(|r| !r.is_empty());
        let display_name = root_reasoner
            .clone()
            .unwrap_or_else(|| run_id.as_str().to_string());
        let current_task = if latest.reasoner_id.is_empty() {
            display_name.clone()
        } else {
            latest.reasoner_id.clone()
        };

        Some(Self {
            root_execution_id: tree.root_execution_id.clone(),
            status,
            display_name,
            current_task,
            root_reasoner,
            agent_node_id: root.map(|r| r.agent_node_id.clone()),
            session_id: root.and_then(|r| r.session_id.clone()),
            actor_id: root.and_then(|r| r.actor_id.clone()),
            total_executions: executions.len(),
            status_counts,
            active_executions,
            max_depth: tree.max_depth,
            started_at,
            updated_at,
            completed_at,
            duration_ms: completed_at.map(|c| (c - started_at).num_milliseconds().max(0)),
            terminal: status.is_terminal(),
            run_id,
        })
    }
}

/// Completed and failed step counts; failed includes timeouts and cancellations.
pub fn count_outcome_steps(executions: &[Execution]) -> (usize, usize) {
    executions.iter().fold((0, 0), |(done, failed), e| match e.status {
        ExecutionStatus::Succeeded => (done + 1, failed),
        s if s.is_incident() => (done, failed + 1),
        _ => (done, failed),
    })
}
