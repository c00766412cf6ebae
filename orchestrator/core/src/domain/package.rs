// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Installed agent packages, as far as the dashboard needs to count them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPackage {
    pub id: String,
    pub name: String,
    pub configuration_required: bool,
    pub configured: bool,
}

impl AgentPackage {
    /// A package is runnable once any configuration it needs has been supplied.
    pub fn is_available(&self) -> bool {
        !self.configuration_required || self.configured
    }
}
