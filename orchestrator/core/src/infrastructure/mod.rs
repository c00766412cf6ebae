// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_client;
pub mod db;
pub mod event_bus;
pub mod payload_store;
pub mod repositories;
pub mod webhook_sender;

pub use agent_client::HttpAgentClient;
pub use event_bus::{EventBus, EventBusError, EventHub};
pub use payload_store::FilePayloadStore;
pub use webhook_sender::HttpWebhookSender;
