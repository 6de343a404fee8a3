//! discovery-sync daemon.
//!
//! Polls the configured collectors and streams their state to the access
//! graph service until interrupted. SIGHUP triggers an immediate extra cycle.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discovery_sync::{Collector, CollectorRegistry, FileCollector, GraphConfig, GraphTransport, SyncAgent};

/// Discovery sync agent
#[derive(Parser, Debug)]
#[command(name = "discovery-sync", version, about)]
struct Args {
    /// Access graph service endpoint
    #[arg(long, default_value = "https://[::1]:50060")]
    graph_endpoint: String,

    /// Client certificate chain (PEM)
    #[arg(long)]
    tls_cert: PathBuf,

    /// Client private key (PEM)
    #[arg(long)]
    tls_key: PathBuf,

    /// CA bundle for the graph service (PEM, defaults to the bundled Mozilla roots)
    #[arg(long)]
    tls_ca: Option<PathBuf>,

    /// Server name to verify instead of the endpoint host
    #[arg(long)]
    tls_server_name: Option<String>,

    /// JSON resource file to collect from (can be repeated)
    #[arg(long = "resources-file")]
    resources_files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discovery_sync=info,tonic=warn,tower=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting discovery-sync");
    info!("Graph endpoint: {}", args.graph_endpoint);

    let collectors: Vec<Arc<dyn Collector>> = args
        .resources_files
        .iter()
        .map(|path| Arc::new(FileCollector::new(path)) as Arc<dyn Collector>)
        .collect();
    info!(collectors = collectors.len(), "Registered static collectors");
    let registry = Arc::new(CollectorRegistry::new(collectors));

    let transport = GraphTransport::new(GraphConfig {
        endpoint: args.graph_endpoint,
        cert: args.tls_cert,
        key: args.tls_key,
        ca: args.tls_ca,
        server_name: args.tls_server_name,
    });

    let shutdown = CancellationToken::new();
    let agent = tokio::spawn(SyncAgent::new(transport, Arc::clone(&registry)).run(shutdown.clone()));

    let mut hangup = unix_signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                info!("Shutting down");
                break;
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading");
                registry.request_reload();
            }
        }
    }

    shutdown.cancel();
    agent.await.context("Sync agent task failed")?;
    Ok(())
}
