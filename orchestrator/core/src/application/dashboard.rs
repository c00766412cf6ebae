// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dashboard Service
//!
//! Read-only rollups over agents, executions and packages for the operator
//! dashboard. Every response is assembled from concurrent store reads; if
//! any read fails the whole response fails. Both views are cached for a
//! short TTL so a busy dashboard does not hammer the store.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Fleet and execution overview for operators

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

use super::status_manager::{StatusError, StatusManager};
use crate::domain::agent::{
    AgentId, AgentNode, AgentState, AgentStatusSnapshot, HealthStatus, LifecycleStatus,
};
use crate::domain::execution::{
    Execution, ExecutionFilter, ExecutionId, ExecutionStatus, RunId, SortField,
};
use crate::domain::repository::{
    AgentRepository, ExecutionRepository, PackageRepository, RepositoryError,
};

/// Upper bound on execution rows read for one rollup window.
const WINDOW_LIMIT: usize = 10_000;
const RUNNING_LIMIT: usize = 12;
const AGENT_HEALTH_LIMIT: usize = 12;
const TOP_WORKFLOWS_LIMIT: usize = 5;
const ACTIVE_RUNS_LIMIT: usize = 6;
const LONGEST_EXECUTIONS_LIMIT: usize = 5;
const INCIDENTS_LIMIT: usize = 10;
const TREND_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub agents: AgentsSummary,
    pub executions: ExecutionsSummary,
    /// Percentage of today's executions that succeeded
    pub success_rate: f64,
    pub packages: PackagesSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentsSummary {
    pub running: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionsSummary {
    pub today: usize,
    pub yesterday: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagesSummary {
    pub available: usize,
    pub installed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedDashboard {
    pub generated_at: DateTime<Utc>,
    pub overview: EnhancedOverview,
    pub execution_trends: ExecutionTrends,
    pub agent_health: AgentHealthSummary,
    pub workflows: WorkflowInsights,
    pub incidents: Vec<IncidentItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedOverview {
    pub total_agents: usize,
    pub active_agents: usize,
    pub degraded_agents: usize,
    pub offline_agents: usize,
    pub total_reasoners: usize,
    pub total_skills: usize,
    pub executions_last_24h: usize,
    pub executions_last_7d: usize,
    pub success_rate_24h: f64,
    pub average_duration_ms_24h: f64,
    pub median_duration_ms_24h: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrends {
    pub last_24h: ExecutionWindowMetrics,
    pub last_7_days: Vec<ExecutionTrendPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionWindowMetrics {
    pub total: usize,
    pub succeeded: usize,
    /// Failed, timed out and cancelled
    pub failed: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub median_duration_ms: f64,
    pub throughput_per_hour: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrendPoint {
    /// `YYYY-MM-DD` in UTC
    pub date: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Dashboard bucket for one agent. Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealthBucket {
    Degraded,
    Offline,
    Running,
    /// Status could not be determined
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthSummary {
    pub total: usize,
    pub active: usize,
    pub degraded: usize,
    /// Includes agents whose status could not be determined
    pub offline: usize,
    pub agents: Vec<AgentHealthItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealthItem {
    pub id: AgentId,
    pub team_id: String,
    pub version: String,
    pub status: AgentHealthBucket,
    pub health: HealthStatus,
    pub lifecycle: LifecycleStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub reasoners: usize,
    pub skills: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInsights {
    pub top_workflows: Vec<WorkflowStat>,
    pub active_runs: Vec<ActiveWorkflowRun>,
    pub longest_executions: Vec<CompletedExecutionStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStat {
    pub run_id: RunId,
    pub name: String,
    pub total_executions: usize,
    pub success_rate: f64,
    pub failed_executions: usize,
    pub average_duration_ms: f64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveWorkflowRun {
    pub execution_id: ExecutionId,
    pub run_id: RunId,
    pub agent_node_id: AgentId,
    pub reasoner_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedExecutionStat {
    pub execution_id: ExecutionId,
    pub run_id: RunId,
    pub reasoner_id: String,
    pub duration_ms: i64,
    pub completed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentItem {
    pub execution_id: ExecutionId,
    pub run_id: RunId,
    pub agent_node_id: AgentId,
    pub reasoner_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Single-value cache that expires `ttl` after the last `set`.
struct TtlCache<T> {
    ttl: Duration,
    entry: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
        }
    }

    fn get(&self) -> Option<T> {
        self.entry
            .read()
            .as_ref()
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    fn set(&self, value: T) {
        *self.entry.write() = Some((Instant::now(), value));
    }

    fn clear(&self) {
        *self.entry.write() = None;
    }
}

pub struct DashboardService {
    agents: Arc<dyn AgentRepository>,
    executions: Arc<dyn ExecutionRepository>,
    packages: Option<Arc<dyn PackageRepository>>,
    status: Arc<StatusManager>,
    summary_cache: TtlCache<DashboardSummary>,
    enhanced_cache: TtlCache<EnhancedDashboard>,
}

impl DashboardService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        executions: Arc<dyn ExecutionRepository>,
        status: Arc<StatusManager>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            agents,
            executions,
            packages: None,
            status,
            summary_cache: TtlCache::new(cache_ttl),
            enhanced_cache: TtlCache::new(cache_ttl),
        }
    }

    /// Without a package catalog both package counts are zero.
    pub fn with_packages(mut self, packages: Arc<dyn PackageRepository>) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn invalidate(&self) {
        self.summary_cache.clear();
        self.enhanced_cache.clear();
    }

    pub async fn summary(&self) -> Result<DashboardSummary, DashboardError> {
        if let Some(cached) = self.summary_cache.get() {
            debug!("Returning cached dashboard summary");
            return Ok(cached);
        }

        let now = Utc::now();
        let result = tokio::try_join!(
            self.agents_summary(),
            self.executions_summary(now),
            self.packages_summary(),
        );
        let (agents, (executions, success_rate), packages) = match result {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "Failed to collect dashboard summary");
                return Err(e);
            }
        };

        let summary = DashboardSummary {
            agents,
            executions,
            success_rate,
            packages,
        };
        self.summary_cache.set(summary.clone());
        Ok(summary)
    }

    pub async fn enhanced(&self) -> Result<EnhancedDashboard, DashboardError> {
        if let Some(cached) = self.enhanced_cache.get() {
            debug!("Returning cached enhanced dashboard");
            return Ok(cached);
        }

        let now = Utc::now();
        let window = ExecutionFilter::default()
            .started_after(now - ChronoDuration::days(TREND_DAYS))
            .sorted_by(SortField::StartedAt, false)
            .limit(WINDOW_LIMIT);
        let running = ExecutionFilter::default()
            .with_status(ExecutionStatus::Running)
            .sorted_by(SortField::StartedAt, true)
            .limit(RUNNING_LIMIT);

        let result = tokio::try_join!(
            async { self.executions.query(&window).await.map_err(DashboardError::from) },
            self.live_agents(),
            async { self.executions.query(&running).await.map_err(DashboardError::from) },
        );
        let (executions, agents, running) = match result {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, "Failed to collect enhanced dashboard");
                return Err(e);
            }
        };

        let classified = self.classify_agents(&agents).await;
        let dashboard = EnhancedDashboard {
            generated_at: now,
            overview: build_overview(now, &agents, &classified, &executions),
            execution_trends: build_trends(now, &executions),
            agent_health: build_agent_health(&agents, &classified),
            workflows: build_workflow_insights(now, &executions, &running),
            incidents: build_incidents(&executions, INCIDENTS_LIMIT),
        };
        self.enhanced_cache.set(dashboard.clone());
        Ok(dashboard)
    }

    async fn live_agents(&self) -> Result<Vec<AgentNode>, DashboardError> {
        let mut agents = self.agents.list_all().await?;
        agents.retain(|node| !node.is_retired());
        Ok(agents)
    }

    async fn statuses(
        &self,
        agents: &[AgentNode],
    ) -> Vec<Result<AgentStatusSnapshot, StatusError>> {
        join_all(
            agents
                .iter()
                .map(|node| self.status.get_agent_status_snapshot(&node.id, Some(node))),
        )
        .await
    }

    async fn agents_summary(&self) -> Result<AgentsSummary, DashboardError> {
        let agents = self.live_agents().await?;
        let running = self
            .statuses(&agents)
            .await
            .iter()
            .filter(|status| matches!(status, Ok(s) if s.state == AgentState::Active))
            .count();

        Ok(AgentsSummary {
            running,
            total: agents.len(),
        })
    }

    async fn executions_summary(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(ExecutionsSummary, f64), DashboardError> {
        let today = start_of_day(now.date_naive());
        let yesterday = today - ChronoDuration::days(1);

        let today_filter = ExecutionFilter::default()
            .started_after(today)
            .limit(WINDOW_LIMIT);
        let yesterday_filter = ExecutionFilter {
            started_before: Some(today),
            ..ExecutionFilter::default()
                .started_after(yesterday)
                .limit(WINDOW_LIMIT)
        };

        let (today_executions, mut yesterday_executions) = tokio::try_join!(
            self.executions.query(&today_filter),
            self.executions.query(&yesterday_filter),
        )?;
        // The store's upper bound is inclusive.
        yesterday_executions.retain(|e| e.started_at < today);

        let succeeded = today_executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Succeeded)
            .count();

        Ok((
            ExecutionsSummary {
                today: today_executions.len(),
                yesterday: yesterday_executions.len(),
            },
            percentage(succeeded, today_executions.len()),
        ))
    }

    async fn packages_summary(&self) -> Result<PackagesSummary, DashboardError> {
        let Some(packages) = &self.packages else {
            return Ok(PackagesSummary {
                available: 0,
                installed: 0,
            });
        };
        let packages = packages.list_all().await?;
        Ok(PackagesSummary {
            available: packages.len(),
            installed: packages.iter().filter(|p| p.is_available()).count(),
        })
    }

    async fn classify_agents(&self, agents: &[AgentNode]) -> Vec<AgentHealthBucket> {
        let statuses = self.statuses(agents).await;
        agents
            .iter()
            .zip(statuses)
            .map(|(node, status)| classify_agent(node, status.ok().as_ref()))
            .collect()
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn mean(values: &[i64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<i64>() as f64 / values.len() as f64
    }
}

/// Median by full sort; the mean of the two middle values for even lengths.
pub fn median(values: &mut [i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid] as f64
    } else {
        (values[mid - 1] + values[mid]) as f64 / 2.0
    }
}

/// A stored node that already looks unhealthy is degraded without
/// consulting the live status.
fn classify_agent(node: &AgentNode, status: Option<&AgentStatusSnapshot>) -> AgentHealthBucket {
    if node.lifecycle_status() == LifecycleStatus::Degraded
        || node.health_status() == HealthStatus::Inactive
    {
        return AgentHealthBucket::Degraded;
    }
    match status {
        Some(snapshot) if snapshot.state == AgentState::Active => AgentHealthBucket::Running,
        Some(_) => AgentHealthBucket::Offline,
        None => AgentHealthBucket::Unknown,
    }
}

#[derive(Default)]
struct WindowTally {
    total: usize,
    succeeded: usize,
    failed: usize,
    durations: Vec<i64>,
}

impl WindowTally {
    fn add(&mut self, execution: &Execution) {
        self.total += 1;
        if execution.status == ExecutionStatus::Succeeded {
            self.succeeded += 1;
        } else if execution.status.is_incident() {
            self.failed += 1;
        }
        if let Some(duration) = execution.duration_ms {
            self.durations.push(duration);
        }
    }

    fn last_24h(now: DateTime<Utc>, executions: &[Execution]) -> Self {
        let since = now - ChronoDuration::hours(24);
        let mut tally = Self::default();
        for execution in executions.iter().filter(|e| e.started_at >= since) {
            tally.add(execution);
        }
        tally
    }
}

fn build_overview(
    now: DateTime<Utc>,
    agents: &[AgentNode],
    classified: &[AgentHealthBucket],
    executions: &[Execution],
) -> EnhancedOverview {
    let mut tally = WindowTally::last_24h(now, executions);
    let active_agents = count_bucket(classified, AgentHealthBucket::Running);
    let degraded_agents = count_bucket(classified, AgentHealthBucket::Degraded);

    EnhancedOverview {
        total_agents: agents.len(),
        active_agents,
        degraded_agents,
        offline_agents: agents.len() - active_agents - degraded_agents,
        total_reasoners: agents.iter().map(|a| a.reasoners.len()).sum(),
        total_skills: agents.iter().map(|a| a.skills.len()).sum(),
        executions_last_24h: tally.total,
        executions_last_7d: executions.len(),
        success_rate_24h: percentage(tally.succeeded, tally.total),
        average_duration_ms_24h: mean(&tally.durations),
        median_duration_ms_24h: median(&mut tally.durations),
    }
}

fn count_bucket(classified: &[AgentHealthBucket], bucket: AgentHealthBucket) -> usize {
    classified.iter().filter(|b| **b == bucket).count()
}

fn build_trends(now: DateTime<Utc>, executions: &[Execution]) -> ExecutionTrends {
    let today = now.date_naive();
    let days: Vec<NaiveDate> = (0..TREND_DAYS)
        .rev()
        .map(|offset| today - ChronoDuration::days(offset))
        .collect();

    let mut buckets: HashMap<NaiveDate, WindowTally> = HashMap::new();
    for execution in executions {
        let day = execution.started_at.date_naive();
        if days.contains(&day) {
            buckets.entry(day).or_default().add(execution);
        }
    }

    let last_7_days = days
        .iter()
        .map(|day| {
            let tally = buckets.remove(day).unwrap_or_default();
            ExecutionTrendPoint {
                date: day.format("%Y-%m-%d").to_string(),
                total: tally.total,
                succeeded: tally.succeeded,
                failed: tally.failed,
            }
        })
        .collect();

    let mut tally = WindowTally::last_24h(now, executions);
    let last_24h = ExecutionWindowMetrics {
        total: tally.total,
        succeeded: tally.succeeded,
        failed: tally.failed,
        success_rate: percentage(tally.succeeded, tally.total),
        average_duration_ms: mean(&tally.durations),
        median_duration_ms: median(&mut tally.durations),
        throughput_per_hour: tally.total as f64 / 24.0,
    };

    ExecutionTrends {
        last_24h,
        last_7_days,
    }
}

fn build_agent_health(agents: &[AgentNode], classified: &[AgentHealthBucket]) -> AgentHealthSummary {
    let mut items: Vec<AgentHealthItem> = agents
        .iter()
        .zip(classified)
        .map(|(node, bucket)| AgentHealthItem {
            id: node.id.clone(),
            team_id: node.team_id.clone(),
            version: node.version.clone(),
            status: *bucket,
            health: node.health_status(),
            lifecycle: node.lifecycle_status(),
            last_heartbeat: node.last_heartbeat,
            reasoners: node.reasoners.len(),
            skills: node.skills.len(),
        })
        .collect();

    // Bucket order first, then most recent heartbeat. `None` sorts last.
    items.sort_by_key(|item| (item.status, Reverse(item.last_heartbeat)));
    items.truncate(AGENT_HEALTH_LIMIT);

    let active = count_bucket(classified, AgentHealthBucket::Running);
    let degraded = count_bucket(classified, AgentHealthBucket::Degraded);
    AgentHealthSummary {
        total: agents.len(),
        active,
        degraded,
        offline: agents.len() - active - degraded,
        agents: items,
    }
}

fn build_workflow_insights(
    now: DateTime<Utc>,
    executions: &[Execution],
    running: &[Execution],
) -> WorkflowInsights {
    struct Aggregate {
        name: String,
        tally: WindowTally,
        last_activity: DateTime<Utc>,
    }

    let mut aggregates: HashMap<&RunId, Aggregate> = HashMap::new();
    for execution in executions {
        let aggregate = aggregates.entry(&execution.run_id).or_insert_with(|| Aggregate {
            name: execution.reasoner_id.clone(),
            tally: WindowTally::default(),
            last_activity: execution.started_at,
        });
        aggregate.tally.add(execution);
        aggregate.last_activity = aggregate.last_activity.max(execution.started_at);
    }

    let mut top_workflows: Vec<WorkflowStat> = aggregates
        .into_iter()
        .map(|(run_id, aggregate)| WorkflowStat {
            run_id: run_id.clone(),
            name: aggregate.name,
            total_executions: aggregate.tally.total,
            success_rate: percentage(aggregate.tally.succeeded, aggregate.tally.total),
            failed_executions: aggregate.tally.failed,
            average_duration_ms: mean(&aggregate.tally.durations),
            last_activity: aggregate.last_activity,
        })
        .collect();
    top_workflows.sort_by(|a, b| {
        b.total_executions
            .cmp(&a.total_executions)
            .then_with(|| b.last_activity.cmp(&a.last_activity))
    });
    top_workflows.truncate(TOP_WORKFLOWS_LIMIT);

    let mut active_runs: Vec<ActiveWorkflowRun> = running
        .iter()
        .map(|e| ActiveWorkflowRun {
            execution_id: e.execution_id.clone(),
            run_id: e.run_id.clone(),
            agent_node_id: e.agent_node_id.clone(),
            reasoner_id: e.reasoner_id.clone(),
            started_at: e.started_at,
            elapsed_ms: (now - e.started_at).num_milliseconds().max(0),
            status: e.status,
        })
        .collect();
    active_runs.sort_by_key(|run| Reverse(run.elapsed_ms));
    active_runs.truncate(ACTIVE_RUNS_LIMIT);

    let mut longest_executions: Vec<CompletedExecutionStat> = executions
        .iter()
        .filter_map(|e| {
            Some(CompletedExecutionStat {
                execution_id: e.execution_id.clone(),
                run_id: e.run_id.clone(),
                reasoner_id: e.reasoner_id.clone(),
                duration_ms: e.duration_ms?,
                completed_at: e.completed_at?,
                status: e.status,
            })
        })
        .collect();
    longest_executions.sort_by_key(|e| Reverse((e.duration_ms, e.completed_at)));
    longest_executions.truncate(LONGEST_EXECUTIONS_LIMIT);

    WorkflowInsights {
        top_workflows,
        active_runs,
        longest_executions,
    }
}

fn build_incidents(executions: &[Execution], limit: usize) -> Vec<IncidentItem> {
    let mut incidents: Vec<IncidentItem> = executions
        .iter()
        .filter(|e| e.status.is_incident())
        .map(|e| IncidentItem {
            execution_id: e.execution_id.clone(),
            run_id: e.run_id.clone(),
            agent_node_id: e.agent_node_id.clone(),
            reasoner_id: e.reasoner_id.clone(),
            status: e.status,
            started_at: e.started_at,
            completed_at: e.completed_at,
            error: e.error_message.clone().filter(|m| !m.is_empty()),
        })
        .collect();
    incidents.sort_by_key(|i| Reverse(i.started_at));
    incidents.truncate(limit);
    incidents
}
