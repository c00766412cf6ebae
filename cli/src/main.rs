// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Brain Control Plane Server
//!
//! The `brain-server` binary hosts the control plane: it loads configuration,
//! opens storage, starts the presence sweep, health poll and stale-execution
//! reaper, and runs until SIGINT/SIGTERM.
//!
//! Configuration discovery: `--config`, then `BRAIN_CONFIG_PATH`,
//! `./brain-config.yaml`, `~/.brain/config.yaml`, `/etc/brain/config.yaml`.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use brain_control_plane_core::ControlPlaneConfig;

mod server;

/// Brain control plane - agent fleet status and execution dispatch
#[derive(Parser)]
#[command(name = "brain-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, env = "BRAIN_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "BRAIN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (compact, json); overrides the config file
    #[arg(long, env = "BRAIN_LOG_FORMAT")]
    log_format: Option<String>,

    /// Prometheus scrape port; overrides the config file
    #[arg(long, env = "BRAIN_METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal outside development.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = ControlPlaneConfig::load_or_default(cli.config)
        .context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }
    if let Some(port) = cli.metrics_port {
        config.observability.metrics_port = Some(port);
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    if let Some(port) = config.observability.metrics_port {
        init_metrics(port)?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.storage.backend,
        "Starting brain control plane"
    );
    server::run(config).await
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().with_current_span(false).init(),
        "compact" => builder.with_target(false).compact().init(),
        other => anyhow::bail!("Unsupported log format: {} (expected compact or json)", other),
    }

    Ok(())
}

fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}
