// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, value objects and the contracts the
//! infrastructure layer implements.

pub mod agent;
pub mod agent_client;
pub mod config;
pub mod events;
pub mod execution;
pub mod mcp;
pub mod package;
pub mod payload;
pub mod repository;
pub mod webhook;
pub mod workflow;
