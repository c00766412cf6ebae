// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Presence Manager - heartbeat leases
//!
//! Every heartbeat renews a lease. A periodic sweep marks agents whose lease
//! ran out as inactive (once per expiry) and evicts leases that stay silent
//! for the hard-evict TTL after that.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Turn the absence of heartbeats into a status change

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::status_manager::{StatusError, StatusManager};
use crate::domain::agent::{AgentId, AgentState, AgentStatusUpdate, StatusSource};
use crate::domain::config::PresenceConfig;

pub const LEASE_EXPIRED_REASON: &str = "presence lease expired";

/// Invoked on its own task each time a lease expires.
pub type ExpireCallback = Arc<dyn Fn(AgentId) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PresenceManagerConfig {
    pub heartbeat_ttl: Duration,
    pub sweep_interval: Duration,
    pub hard_evict_ttl: Duration,
}

impl From<&PresenceConfig> for PresenceManagerConfig {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            heartbeat_ttl: config.heartbeat_ttl,
            sweep_interval: config.effective_sweep_interval(),
            hard_evict_ttl: config.hard_evict_ttl,
        }
    }
}

impl Default for PresenceManagerConfig {
    fn default() -> Self {
        Self::from(&PresenceConfig::default())
    }
}

/// Heartbeat lease for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceLease {
    pub last_seen: Instant,
    pub last_expired: Option<Instant>,
    /// Set once per expiry episode; cleared only by a fresh touch.
    pub marked_offline: bool,
}

pub struct PresenceManager {
    status: Arc<StatusManager>,
    config: PresenceManagerConfig,
    leases: DashMap<AgentId, PresenceLease>,
    on_expire: RwLock<Option<ExpireCallback>>,
}

impl PresenceManager {
    pub fn new(status: Arc<StatusManager>, config: PresenceManagerConfig) -> Self {
        Self {
            status,
            config,
            leases: DashMap::new(),
            on_expire: RwLock::new(None),
        }
    }

    pub fn set_expire_callback(&self, callback: ExpireCallback) {
        *self.on_expire.write() = Some(callback);
    }

    /// Renews (or creates) the lease for an agent. Touches older than the
    /// current `last_seen` are ignored.
    pub fn touch(&self, agent_id: &AgentId, at: Instant) {
        self.leases
            .entry(agent_id.clone())
            .and_modify(|lease| {
                if at >= lease.last_seen {
                    lease.last_seen = at;
                    lease.last_expired = None;
                    lease.marked_offline = false;
                }
            })
            .or_insert(PresenceLease {
                last_seen: at,
                last_expired: None,
                marked_offline: false,
            });
    }

    /// True while the agent holds an unexpired lease.
    pub fn has_lease(&self, agent_id: &AgentId) -> bool {
        self.leases
            .get(agent_id)
            .map(|lease| !lease.marked_offline)
            .unwrap_or(false)
    }

    pub fn lease(&self, agent_id: &AgentId) -> Option<PresenceLease> {
        self.leases.get(agent_id).map(|lease| *lease)
    }

    pub fn forget(&self, agent_id: &AgentId) {
        self.leases.remove(agent_id);
    }

    pub fn tracked(&self) -> usize {
        self.leases.len()
    }

    /// One sweep pass. Returns the number of leases that expired in this pass.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut newly_expired = Vec::new();
        let mut evicted = Vec::new();

        for mut entry in self.leases.iter_mut() {
            match entry.last_expired {
                Some(expired_at) => {
                    if now.saturating_duration_since(expired_at) >= self.config.hard_evict_ttl {
                        evicted.push(entry.key().clone());
                    }
                }
                None => {
                    if now.saturating_duration_since(entry.last_seen) >= self.config.heartbeat_ttl {
                        entry.last_expired = Some(now);
                        entry.marked_offline = true;
                        newly_expired.push(entry.key().clone());
                    }
                }
            }
        }

        for agent_id in &evicted {
            // A touch may have landed since the scan.
            let removed = self
                .leases
                .remove_if(agent_id, |_, lease| lease.marked_offline)
                .is_some();
            if removed {
                debug!(agent_id = %agent_id, "Evicted presence lease");
            }
        }

        for agent_id in &newly_expired {
            self.expire(agent_id).await;
        }

        if !newly_expired.is_empty() {
            metrics::counter!("brain_presence_expirations_total").increment(newly_expired.len() as u64);
        }
        newly_expired.len()
    }

    async fn expire(&self, agent_id: &AgentId) {
        info!(agent_id = %agent_id, "Presence lease expired");

        let update = AgentStatusUpdate::new(StatusSource::Presence)
            .with_state(AgentState::Inactive)
            .with_score(0)
            .with_reason(LEASE_EXPIRED_REASON);

        match self.status.update_agent_status(agent_id, update).await {
            Ok(_) => {}
            Err(StatusError::NotFound(_)) => {
                debug!(agent_id = %agent_id, "Expired lease for unknown agent, dropping");
                self.leases.remove(agent_id);
            }
            Err(e) => warn!(agent_id = %agent_id, error = %e, "Failed to mark agent inactive"),
        }

        let callback = self.on_expire.read().clone();
        if let Some(callback) = callback {
            tokio::spawn(callback(agent_id.clone()));
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, shutdown: CancellationToken) {
        info!(
            heartbeat_ttl = ?self.config.heartbeat_ttl,
            sweep_interval = ?self.config.sweep_interval,
            "Starting presence sweeper"
        );

        let mut tick = interval(self.config.sweep_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let expired = self.sweep().await;
                    if expired > 0 {
                        debug!(expired, "Presence sweep completed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Presence sweeper shutting down");
                    break;
                }
            }
        }
    }
}
