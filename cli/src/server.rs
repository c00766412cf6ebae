// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Control plane process lifecycle

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use brain_control_plane_core::infrastructure::event_bus::EventBusError;
use brain_control_plane_core::{ControlPlane, ControlPlaneConfig};

/// Grace period for background loops after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run(config: ControlPlaneConfig) -> Result<()> {
    let plane = ControlPlane::from_config(config)
        .await
        .context("Failed to initialize control plane")?;

    let shutdown = CancellationToken::new();
    let mut handles = plane.start(shutdown.clone());
    handles.push(spawn_event_log(&plane, shutdown.clone()));

    info!("Control plane running");
    shutdown_signal().await;
    info!("Control plane shutting down");
    shutdown.cancel();

    for handle in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Background task panicked: {}", e),
            Err(_) => warn!("Background task did not stop within {:?}", SHUTDOWN_GRACE),
        }
    }

    info!("Control plane stopped");
    Ok(())
}

/// Mirrors agent and execution events into the log at debug level.
fn spawn_event_log(
    plane: &ControlPlane,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut agents = plane.events.agents.subscribe();
    let mut executions = plane.events.executions.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = agents.recv() => match event {
                    Ok(event) => debug!(event = ?event, "Agent event"),
                    Err(EventBusError::Lagged(n)) => warn!(missed = n, "Agent event log lagged"),
                    Err(_) => break,
                },
                event = executions.recv() => match event {
                    Ok(event) => debug!(event_type = event.event_type(), "Execution event"),
                    Err(EventBusError::Lagged(n)) => warn!(missed = n, "Execution event log lagged"),
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
