// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow run queries
//!
//! Runs are never stored. Every listing groups execution records by
//! `run_id`, rolls each group up into a [`WorkflowRunSummary`] and then
//! filters, sorts and pages the summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::execution::{
    Execution, ExecutionFilter, ExecutionStatus, RunId, SortField,
};
use crate::domain::repository::{ExecutionRepository, RepositoryError};
use crate::domain::workflow::{count_outcome_steps, ExecutionTree, WorkflowRunSummary};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;

/// Upper bound on executions loaded for one run's detail view.
const RUN_DETAIL_LIMIT: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowQueryError {
    #[error("Workflow run not found: {0}")]
    NotFound(RunId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunQuery {
    /// 1-based; 0 is treated as 1
    pub page: usize,
    /// Clamped to `1..=200`; 0 means the default of 20
    pub page_size: usize,
    pub sort: SortField,
    pub descending: bool,
    pub run_id: Option<RunId>,
    pub status: Option<ExecutionStatus>,
    pub session_id: Option<String>,
    pub actor_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl RunQuery {
    fn effective_page(&self) -> usize {
        self.page.max(1)
    }

    fn effective_page_size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size.clamp(1, MAX_PAGE_SIZE)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPage {
    pub runs: Vec<WorkflowRunSummary>,
    pub total_runs: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetail {
    pub summary: WorkflowRunSummary,
    pub tree: ExecutionTree,
    pub completed_steps: usize,
    pub failed_steps: usize,
}

pub struct WorkflowRunService {
    executions: Arc<dyn ExecutionRepository>,
}

impl WorkflowRunService {
    pub fn new(executions: Arc<dyn ExecutionRepository>) -> Self {
        Self { executions }
    }

    pub async fn list_runs(&self, query: &RunQuery) -> Result<RunPage, WorkflowQueryError> {
        let filter = ExecutionFilter {
            run_id: query.run_id.clone(),
            started_after: query.since,
            ..Default::default()
        };
        let executions = self.executions.query(&filter).await?;

        let mut grouped: HashMap<RunId, Vec<Execution>> = HashMap::new();
        for execution in executions {
            grouped.entry(execution.run_id.clone()).or_default().push(execution);
        }

        let mut summaries: Vec<WorkflowRunSummary> = grouped
            .into_iter()
            .filter_map(|(run_id, group)| WorkflowRunSummary::summarize(run_id, &group))
            .filter(|summary| query.status.map_or(true, |s| summary.status == s))
            .filter(|summary| {
                query
                    .session_id
                    .as_ref()
                    .map_or(true, |s| summary.session_id.as_ref() == Some(s))
            })
            .filter(|summary| {
                query
                    .actor_id
                    .as_ref()
                    .map_or(true, |a| summary.actor_id.as_ref() == Some(a))
            })
            .collect();

        summaries.sort_by(|a, b| {
            let ord = compare_runs(query.sort, a, b).then_with(|| a.run_id.cmp(&b.run_id));
            if query.descending {
                ord.reverse()
            } else {
                ord
            }
        });

        let page = query.effective_page();
        let page_size = query.effective_page_size();
        let total_runs = summaries.len();
        let runs: Vec<WorkflowRunSummary> = summaries
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(RunPage {
            has_more: page.saturating_mul(page_size) < total_runs,
            runs,
            total_runs,
            page,
            page_size,
        })
    }

    pub async fn get_run_detail(&self, run_id: &RunId) -> Result<RunDetail, WorkflowQueryError> {
        let filter = ExecutionFilter::for_run(run_id.clone())
            .sorted_by(SortField::StartedAt, false)
            .limit(RUN_DETAIL_LIMIT);
        let executions = self.executions.query(&filter).await?;

        let summary = WorkflowRunSummary::summarize(run_id.clone(), &executions)
            .ok_or_else(|| WorkflowQueryError::NotFound(run_id.clone()))?;
        let (completed_steps, failed_steps) = count_outcome_steps(&executions);

        Ok(RunDetail {
            summary,
            tree: ExecutionTree::build(&executions),
            completed_steps,
            failed_steps,
        })
    }
}

fn compare_runs(field: SortField, a: &WorkflowRunSummary, b: &WorkflowRunSummary) -> Ordering {
    match field {
        SortField::StartedAt | SortField::CreatedAt => a.started_at.cmp(&b.started_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
        SortField::DurationMs => a.duration_ms.cmp(&b.duration_ms),
        SortField::AgentNodeId => a.agent_node_id.cmp(&b.agent_node_id),
        SortField::ReasonerId => a.root_reasoner.cmp(&b.root_reasoner),
        SortField::ExecutionId => a.root_execution_id.cmp(&b.root_execution_id),
        SortField::RunId => a.run_id.cmp(&b.run_id),
    }
}
