// Copyright (c) 2026 Concord Contributors. MIT License.
// See LICENSE for details.

//! # Concord Node
//!
//! Entry point for the `concord-node` binary. Parses CLI arguments, loads
//! flow settings, initializes logging and metrics, then either serves the
//! HTTP API over an in-process deployment or runs a simulated flow.
//!
//! - `serve`   : start the deployment and the HTTP API
//! - `simulate`: run one flow (or a race) and print the outcome as JSON
//! - `version` : print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod simulation;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use concord_protocol::config::FlowConfig;
use concord_protocol::flow::FlowEvent;

use cli::{Commands, CommonArgs, ConcordNodeCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ConcordNodeCli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Simulate(args) => simulate(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Flow settings from the config file, then the `--notary` override.
fn load_config(common: &CommonArgs) -> Result<FlowConfig> {
    let mut config = match &common.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_json::from_str::<FlowConfig>(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => FlowConfig::default(),
    };
    if let Some(notary) = &common.notary {
        config.notary = notary.clone();
    }
    Ok(config)
}

fn open_cluster(common: &CommonArgs, config: &FlowConfig) -> Result<concord_protocol::Cluster> {
    if let Some(dir) = &common.data_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    }
    simulation::build_cluster(config, common.data_dir.as_deref()).context("failed to start cluster")
}

/// Forward every node's flow events into the log.
fn log_flow_events(cluster: &concord_protocol::Cluster) {
    for name in cluster.node_names() {
        let Some(node) = cluster.node(name.as_str()) else { continue };
        let mut events = node.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(FlowEvent { flow_id, step }) => {
                        tracing::debug!(node = %name, %flow_id, ?step, "flow event");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(node = %name, skipped, "flow event log lagging");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

async fn serve(args: cli::ServeArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, args.common.log_format);

    let config = load_config(&args.common)?;
    tracing::info!(
        notary = %config.notary,
        api_addr = %args.api_addr,
        data_dir = ?args.common.data_dir,
        "starting concord-node"
    );

    let cluster = Arc::new(open_cluster(&args.common, &config)?);
    log_flow_events(&cluster);
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            concord_protocol::config::PROTOCOL_VERSION,
        ),
        started_at: chrono::Utc::now(),
        cluster: Arc::clone(&cluster),
        metrics: node_metrics,
    };
    let router = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&args.api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", args.api_addr))?;
    tracing::info!(addr = %args.api_addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    match Arc::try_unwrap(cluster) {
        Ok(cluster) => cluster.shutdown().await.context("cluster shutdown")?,
        Err(_) => tracing::warn!("cluster still referenced at shutdown, skipping flush"),
    }
    tracing::info!("concord-node stopped");
    Ok(())
}

async fn simulate(args: cli::SimulateArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVES, args.common.log_format);

    let config = load_config(&args.common)?;
    let cluster = open_cluster(&args.common, &config)?;
    log_flow_events(&cluster);
    let node_metrics = NodeMetrics::new().context("failed to register metrics")?;
    let observer = (!args.no_report).then(simulation::regulator);

    let output = if args.race {
        let report = simulation::race(&cluster, &node_metrics, observer).await;
        serde_json::to_string_pretty(&report)?
    } else {
        let result = simulation::start_transition(
            &cluster,
            &node_metrics,
            &args.source,
            &args.target,
            observer,
        )
        .await;
        serde_json::to_string_pretty(&simulation::FlowReport::from(result))?
    };
    println!("{output}");

    cluster.shutdown().await.context("cluster shutdown")?;
    Ok(())
}

fn print_version() {
    println!("concord-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", concord_protocol::config::PROTOCOL_VERSION);
    println!("signatures   {}", concord_protocol::config::SIGNING_ALGORITHM);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}
