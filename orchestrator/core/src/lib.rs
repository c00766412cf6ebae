// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Brain control plane core
//!
//! Tracks a fleet of remote agent nodes, dispatches reasoner and skill
//! invocations to them, and rebuilds workflow runs from the execution
//! records those invocations leave behind.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, application services and infrastructure
//!   adapters for the `brain-server` binary

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::ControlPlane;
pub use domain::config::ControlPlaneConfig;
