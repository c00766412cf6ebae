// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # MCP Sub-Health
//!
//! Agents may host MCP tool servers. The health monitor fetches a summary of
//! those servers whenever an agent becomes active and publishes a UI-facing
//! view only when one of the reported figures actually moves.

use serde::{Deserialize, Serialize};

/// Raw figures reported by an agent's `/mcp/health` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct McpHealthSummary {
    pub total_servers: u32,
    pub running_servers: u32,
    pub total_tools: u32,
    pub overall_health: f64,
}

impl McpHealthSummary {
    /// True when any compared figure differs from `previous`.
    pub fn differs_from(&self, previous: &McpHealthSummary) -> bool {
        self.total_servers != previous.total_servers
            || self.running_servers != previous.running_servers
            || self.total_tools != previous.total_tools
            || self.overall_health != previous.overall_health
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpServiceStatus {
    Ready,
    Degraded,
    Unavailable,
}

impl McpServiceStatus {
    pub fn from_health(overall_health: f64) -> Self {
        if overall_health >= 0.9 {
            McpServiceStatus::Ready
        } else if overall_health >= 0.5 {
            McpServiceStatus::Degraded
        } else {
            McpServiceStatus::Unavailable
        }
    }
}

/// Summary shaped for dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McpStatusView {
    #[serde(flatten)]
    pub summary: McpHealthSummary,
    pub has_issues: bool,
    pub capabilities_available: bool,
    pub service_status: McpServiceStatus,
}

impl From<McpHealthSummary> for McpStatusView {
    fn from(summary: McpHealthSummary) -> Self {
        Self {
            summary,
            has_issues: summary.running_servers < summary.total_servers
                || summary.overall_health < 0.8,
            capabilities_available: summary.running_servers > 0,
            service_status: McpServiceStatus::from_health(summary.overall_health),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_view_thresholds() {
        let healthy = McpStatusView::from(McpHealthSummary {
            total_servers: 2,
            running_servers: 2,
            total_tools: 9,
            overall_health: 0.95,
        });
        assert!(!healthy.has_issues);
        assert_eq!(healthy.service_status, McpServiceStatus::Ready);

        let partial = McpStatusView::from(McpHealthSummary {
            total_servers: 2,
            running_servers: 1,
            total_tools: 4,
            overall_health: 0.6,
        });
        assert!(partial.has_issues);
        assert!(partial.capabilities_available);
        assert_eq!(partial.service_status, McpServiceStatus::Degraded);

        let down = McpStatusView::from(McpHealthSummary::default());
        assert!(!down.capabilities_available);
        assert_eq!(down.service_status, McpServiceStatus::Unavailable);
    }

    #[test]
    fn test_differs_from_compares_every_figure() {
        let a = McpHealthSummary { total_servers: 1, running_servers: 1, total_tools: 3, overall_health: 1.0 };
        assert!(!a.differs_from(&a));
        assert!(a.differs_from(&McpHealthSummary { total_tools: 4, ..a }));
        assert!(a.differs_from(&McpHealthSummary { overall_health: 0.5, ..a }));
    }
}
