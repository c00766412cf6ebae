// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: the services that drive agent liveness, execution
//! dispatch and workflow read models, plus the composition root that wires
//! them together.

pub mod agents;
pub mod control_plane;
pub mod dashboard;
pub mod dispatcher;
pub mod health_monitor;
pub mod presence;
pub mod reaper;
pub mod repository_factory;
pub mod status_manager;
pub mod webhooks;
pub mod workflow_runs;

pub use agents::AgentRegistryService;
pub use control_plane::ControlPlane;
pub use dashboard::{DashboardError, DashboardService};
pub use dispatcher::{DispatchError, ExecutionDispatcher, StandardExecutionDispatcher};
pub use health_monitor::HealthMonitor;
pub use presence::PresenceManager;
pub use reaper::StaleExecutionReaper;
pub use repository_factory::Repositories;
pub use status_manager::{StatusError, StatusManager};
pub use webhooks::{WebhookError, WebhookNotifier};
pub use workflow_runs::{WorkflowQueryError, WorkflowRunService};
